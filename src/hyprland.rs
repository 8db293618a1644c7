//! Hyprland event listener
//!
//! Follows Hyprland's event socket (`.socket2.sock`), maps each
//! `EVENT>>ARGS` line to a haptic effect through the shared config and
//! hands the effect to the dispatch engine. Reconnects forever.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::UnixStream;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use crate::config::{runtime_dir, SharedConfig};
use crate::haptic::EffectSink;

/// Delay before retrying when the socket is unavailable
const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Delay before reconnecting after the stream ends
const SHORT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Separator between event name and arguments
const EVENT_SEPARATOR: &str = ">>";

/// Events that fire repeatedly with unchanged arguments
const DEDUP_EVENTS: &[&str] = &["workspace", "activewindow", "focusedmon", "activewindowv2"];

/// Event socket path for a Hyprland instance
pub fn socket_path_for(runtime_dir: &Path, signature: &str) -> PathBuf {
    runtime_dir.join("hypr").join(signature).join(".socket2.sock")
}

/// Event socket path of the running instance, if Hyprland is running
pub fn socket_path() -> Option<PathBuf> {
    let signature = std::env::var("HYPRLAND_INSTANCE_SIGNATURE").ok()?;
    Some(socket_path_for(&runtime_dir(), &signature))
}

/// Split `EVENT>>ARGS` at the first separator
pub fn parse_event(line: &str) -> Option<(&str, &str)> {
    line.split_once(EVENT_SEPARATOR)
}

/// Maps Hyprland events to haptic triggers
pub struct HyprlandListener {
    sink: Arc<dyn EffectSink>,
    config: SharedConfig,
    last_args: HashMap<String, String>,
}

impl HyprlandListener {
    pub fn new(sink: Arc<dyn EffectSink>, config: SharedConfig) -> Self {
        Self {
            sink,
            config,
            last_args: HashMap::new(),
        }
    }

    /// Effect for one raw line, after de-duplication
    pub fn process_event(&mut self, line: &str) -> Option<i32> {
        let (event, args) = parse_event(line)?;

        if DEDUP_EVENTS.contains(&event) {
            if self.last_args.get(event).is_some_and(|last| last == args) {
                return None;
            }
            self.last_args.insert(event.to_string(), args.to_string());
        }

        let config = self.config.read().unwrap_or_else(PoisonError::into_inner);
        config.get_effect(event, args)
    }

    /// Process one line and trigger the resulting effect
    pub fn handle_line(&mut self, line: &str) {
        if let Some(effect_id) = self.process_event(line) {
            tracing::debug!(line, effect_id, "Hyprland event");
            self.sink.trigger(effect_id);
        }
    }

    /// Consume events until the stream ends or fails
    ///
    /// Lines are split on raw bytes; invalid UTF-8 (window titles) is
    /// replaced rather than treated as a stream error.
    pub async fn follow<R: AsyncRead + Unpin>(&mut self, stream: R) {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => {
                    tracing::warn!("Hyprland connection closed, reconnecting...");
                    return;
                }
                Ok(_) => {
                    let Some(line) = buf.strip_suffix(b"\n") else {
                        // Partial line at end of stream
                        continue;
                    };
                    self.handle_line(&String::from_utf8_lossy(line));
                }
                Err(e) => {
                    tracing::error!(error = %e, "Socket read error");
                    return;
                }
            }
        }
    }

    /// Connect, follow, reconnect; never returns
    pub async fn run(mut self) {
        loop {
            let Some(path) = socket_path() else {
                tracing::error!("HYPRLAND_INSTANCE_SIGNATURE not found");
                sleep(RECONNECT_DELAY).await;
                continue;
            };

            let stream = match UnixStream::connect(&path).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Hyprland socket unreachable, retrying..."
                    );
                    sleep(RECONNECT_DELAY).await;
                    continue;
                }
            };

            tracing::info!("Connected to Hyprland socket2");
            self.follow(stream).await;
            sleep(SHORT_RECONNECT_DELAY).await;
        }
    }

    /// Run on the tokio runtime
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, EventConfig, EventValue};
    use std::sync::{Mutex, RwLock};
    use tokio::io::AsyncWriteExt;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<i32>>);

    impl EffectSink for Recorder {
        fn trigger(&self, effect_id: i32) {
            self.0.lock().unwrap().push(effect_id);
        }
    }

    fn listener() -> (HyprlandListener, Arc<Recorder>) {
        let mut config = AppConfig {
            default_effect: None,
            events: HashMap::new(),
        };
        config.events.insert("workspace".into(), EventValue::Effect(2));
        config.events.insert("openwindow".into(), EventValue::Effect(5));
        config.events.insert(
            "activewindow".into(),
            EventValue::Table(EventConfig {
                default_effect: Some(3),
                args: HashMap::from([("kitty,kitty".to_string(), 4)]),
            }),
        );

        let recorder = Arc::new(Recorder::default());
        let sink: Arc<dyn EffectSink> = recorder.clone();
        (
            HyprlandListener::new(sink, Arc::new(RwLock::new(config))),
            recorder,
        )
    }

    #[test]
    fn test_parse_event_splits_at_first_separator() {
        assert_eq!(parse_event("workspace>>2"), Some(("workspace", "2")));
        assert_eq!(parse_event("activewindow>>a>>b"), Some(("activewindow", "a>>b")));
        assert_eq!(parse_event("no separator"), None);
    }

    #[test]
    fn test_socket_path() {
        let path = socket_path_for(Path::new("/run/user/1000"), "abc");
        assert_eq!(path, PathBuf::from("/run/user/1000/hypr/abc/.socket2.sock"));
    }

    #[test]
    fn test_dedup_repeated_args() {
        let (mut listener, _) = listener();
        assert_eq!(listener.process_event("workspace>>1"), Some(2));
        assert_eq!(listener.process_event("workspace>>1"), None);
        assert_eq!(listener.process_event("workspace>>2"), Some(2));
        assert_eq!(listener.process_event("workspace>>1"), Some(2));
    }

    #[test]
    fn test_non_dedup_events_repeat() {
        let (mut listener, _) = listener();
        assert_eq!(listener.process_event("openwindow>>x"), Some(5));
        assert_eq!(listener.process_event("openwindow>>x"), Some(5));
    }

    #[test]
    fn test_arg_specific_effect() {
        let (mut listener, _) = listener();
        assert_eq!(listener.process_event("activewindow>>kitty,kitty"), Some(4));
        assert_eq!(listener.process_event("activewindow>>firefox,Mozilla"), Some(3));
        assert_eq!(listener.process_event("closewindow>>x"), None);
    }

    #[test]
    fn test_config_swap_takes_effect() {
        let (mut listener, _) = listener();
        *listener.config.write().unwrap() = AppConfig {
            default_effect: Some(9),
            events: HashMap::new(),
        };
        assert_eq!(listener.process_event("openwindow>>x"), Some(9));
    }

    #[tokio::test]
    async fn test_follow_triggers_effects() {
        let (mut listener, recorder) = listener();
        let (mut writer, reader) = tokio::io::duplex(256);

        writer
            .write_all(b"workspace>>1\nworkspace>>1\ngarbage\nopenwindow>>x\n")
            .await
            .unwrap();
        drop(writer);

        listener.follow(reader).await;
        assert_eq!(*recorder.0.lock().unwrap(), vec![2, 5]);
    }

    #[tokio::test]
    async fn test_follow_survives_invalid_utf8() {
        let (mut listener, recorder) = listener();
        let (mut writer, reader) = tokio::io::duplex(256);

        writer
            .write_all(b"openwindow>>a,b,\xff\xfetitle\nworkspace>>2\nworkspace>>3\n")
            .await
            .unwrap();
        drop(writer);

        listener.follow(reader).await;
        assert_eq!(*recorder.0.lock().unwrap(), vec![5, 2, 2]);
    }

    #[tokio::test]
    async fn test_follow_ignores_unterminated_tail() {
        let (mut listener, recorder) = listener();
        let (mut writer, reader) = tokio::io::duplex(256);

        writer.write_all(b"workspace>>1\nopenwindow>>x").await.unwrap();
        drop(writer);

        listener.follow(reader).await;
        assert_eq!(*recorder.0.lock().unwrap(), vec![2]);
    }
}
