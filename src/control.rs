//! Line-oriented control protocol.
//!
//! One command per line, replies are a status code followed by text:
//! `200` done, `202` accepted and running in the background, `400` rejected,
//! `231` goodbye. Used on stdin by the binary and over TCP with `--listen`.

use crate::error::NavigatorError;
use crate::navigator::PageNavigator;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

pub type SharedNavigator = Arc<Mutex<PageNavigator>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Play,
    Pause,
    Stop,
    Next,
    Previous,
    Goto(usize),
    Status,
    Text,
    Hide,
    Show,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("Unknown command: {0}")]
    Unknown(String),

    #[error("Usage: {0}")]
    Usage(&'static str),
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let name = parts.next().unwrap_or_default().to_lowercase();
        let command = match name.as_str() {
            "play" | "speak" => Command::Play,
            "pause" => Command::Pause,
            "stop" => Command::Stop,
            "next" | "n" => Command::Next,
            "prev" | "previous" | "p" => Command::Previous,
            "goto" | "page" => {
                let page = parts
                    .next()
                    .and_then(|p| p.parse().ok())
                    .ok_or(CommandError::Usage("goto <page>"))?;
                Command::Goto(page)
            }
            "status" => Command::Status,
            "text" => Command::Text,
            "hide" => Command::Hide,
            "show" => Command::Show,
            "quit" | "exit" => Command::Quit,
            _ => return Err(CommandError::Unknown(name)),
        };
        if parts.next().is_some() && !matches!(command, Command::Goto(_)) {
            return Err(CommandError::Usage("one command per line"));
        }
        Ok(command)
    }
}

fn page_reply(moved: Result<usize, NavigatorError>, nav: &PageNavigator) -> String {
    match moved {
        Ok(page) => format!("200 OK page {}/{}", page, nav.page_count()),
        Err(e) => format!("400 ERR {}", e),
    }
}

/// Runs one command and returns the reply line, or `None` to end the session.
pub async fn execute(command: Command, navigator: &SharedNavigator) -> Option<String> {
    let mut nav = navigator.lock().await;
    let reply = match command {
        Command::Play => {
            let buttons = nav.controller().button_availability();
            if !buttons.play_enabled {
                let reason = buttons
                    .label
                    .unwrap_or_else(|| format!("already {}", nav.controller().state()));
                return Some(format!("400 ERR {}", reason));
            }
            let controller = nav.controller().clone();
            let page = nav.current_page();

            // Enter Synthesizing while the navigator is still locked, so a
            // page change queued behind this command cancels the narration.
            match controller.begin_play(&nav.current_text()) {
                Ok(true) => {}
                Ok(false) => return Some(format!("200 OK {}", controller.state())),
                Err(e) => return Some(format!("400 ERR {}", e)),
            }
            drop(nav);

            // Failures reach the user as notices.
            tokio::spawn(async move {
                if let Err(e) = controller.finish_play().await {
                    tracing::debug!("Narration of page {} failed: {}", page, e);
                }
            });
            format!("202 OK narrating page {}", page)
        }
        Command::Pause => {
            nav.controller().pause();
            format!("200 OK {}", nav.controller().state())
        }
        Command::Stop => {
            nav.controller().stop();
            format!("200 OK {}", nav.controller().state())
        }
        Command::Next => page_reply(nav.next(), &nav),
        Command::Previous => page_reply(nav.previous(), &nav),
        Command::Goto(page) => page_reply(nav.go_to(page), &nav),
        Command::Status => {
            let stats = nav.controller().stats();
            format!(
                "200 OK page={}/{} state={} enabled={} playbacks={} session={}",
                nav.current_page(),
                nav.page_count(),
                stats.state,
                stats.enabled,
                stats.playback_count,
                stats.session_id
            )
        }
        Command::Text => {
            let text = nav.current_text();
            format!("200 OK {}", text.split_whitespace().collect::<Vec<_>>().join(" "))
        }
        Command::Hide => {
            nav.set_visible(false);
            "200 OK hidden".to_string()
        }
        Command::Show => {
            nav.set_visible(true);
            "200 OK visible".to_string()
        }
        Command::Quit => return None,
    };
    Some(reply)
}

/// Serves commands from `reader` until EOF or `quit`.
pub async fn run_session<R, W>(reader: R, mut writer: W, navigator: SharedNavigator) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    writer.write_all(b"299 OK pdf-narrator ready\r\n").await?;
    writer.flush().await?;

    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let reply = match line.parse::<Command>() {
            Ok(command) => match execute(command, &navigator).await {
                Some(reply) => reply,
                None => break,
            },
            Err(e) => format!("400 ERR {}", e),
        };
        writer.write_all(reply.as_bytes()).await?;
        writer.write_all(b"\r\n").await?;
        writer.flush().await?;
    }

    writer.write_all(b"231 BYE\r\n").await?;
    writer.flush().await
}

/// Accepts control connections on `addr`, one session per connection.
pub async fn serve(addr: &str, navigator: SharedNavigator) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Control protocol listening on {}", listener.local_addr()?);

    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                let navigator = navigator.clone();
                tokio::spawn(async move {
                    let (reader, writer) = socket.into_split();
                    let reader = tokio::io::BufReader::new(reader);
                    if let Err(e) = run_session(reader, writer, navigator).await {
                        tracing::warn!("Control connection {} failed: {}", peer, e);
                    }
                });
            }
            Err(e) => tracing::warn!("Control accept failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SpeechBackend;
    use crate::controller::{ControllerOptions, NarrationController};
    use crate::credentials::{Credential, CredentialProvider};
    use crate::error::{AuthError, PlaybackError, SynthesisError};
    use crate::events::EventBus;
    use crate::media::{ClipId, MediaSink};
    use crate::navigator::TextPages;
    use crate::state::PlaybackState;
    use crate::storage::{KeyValueStore, MemoryStore};
    use crate::tracking::InteractionTracker;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FixedCredentials;

    #[async_trait]
    impl CredentialProvider for FixedCredentials {
        async fn ensure_valid(&self) -> Result<Credential, AuthError> {
            Ok(Credential {
                access_token: "token".to_string(),
                expiry_timestamp_ms: i64::MAX,
            })
        }

        fn invalidate(&self) -> Result<(), AuthError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SpeechBackend for CountingBackend {
        async fn synthesize(&self, _token: &str, text: &str) -> Result<Vec<u8>, SynthesisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(text.as_bytes().to_vec())
        }

        fn id(&self) -> &'static str {
            "counting"
        }
    }

    #[derive(Default)]
    struct CountingSink {
        loads: AtomicUsize,
    }

    impl MediaSink for CountingSink {
        fn load(&self, _clip: ClipId, _audio: Vec<u8>) -> Result<(), PlaybackError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn play(&self, _clip: ClipId) -> Result<(), PlaybackError> {
            Ok(())
        }

        fn pause(&self, _clip: ClipId) {}

        fn rewind(&self, _clip: ClipId) {}

        fn release(&self, _clip: ClipId) {}
    }

    fn navigator_with(
        controller: impl FnOnce(Arc<InteractionTracker>, EventBus) -> NarrationController,
    ) -> SharedNavigator {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let bus = EventBus::default();
        let tracker = Arc::new(InteractionTracker::new(store.clone(), bus.clone()));
        let controller = controller(tracker.clone(), bus);
        let nav = PageNavigator::new(
            Box::new(TextPages::from_text("One.\u{c}Two\n  lines.")),
            controller,
            store,
            tracker,
            None,
        )
        .unwrap();
        Arc::new(Mutex::new(nav))
    }

    fn shared_navigator() -> SharedNavigator {
        navigator_with(|tracker, bus| {
            NarrationController::disabled("No service account configured", tracker, bus)
        })
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!("PLAY".parse::<Command>(), Ok(Command::Play));
        assert_eq!("goto 3".parse::<Command>(), Ok(Command::Goto(3)));
        assert_eq!("prev".parse::<Command>(), Ok(Command::Previous));
        assert_eq!("hide".parse::<Command>(), Ok(Command::Hide));
        assert_eq!(
            "goto x".parse::<Command>(),
            Err(CommandError::Usage("goto <page>"))
        );
        assert_eq!(
            "rewind".parse::<Command>(),
            Err(CommandError::Unknown("rewind".to_string()))
        );
    }

    #[tokio::test]
    async fn test_session_transcript() {
        let input: &[u8] = b"status\nnext\ntext\ngoto 9\nplay\nbogus\nhide\nshow\nquit\nstatus\n";
        let mut output = Vec::new();

        run_session(input, &mut output, shared_navigator()).await.unwrap();

        let output = String::from_utf8(output).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines[0], "299 OK pdf-narrator ready");
        assert!(lines[1].starts_with("200 OK page=1/2 state=idle enabled=false playbacks=0"));
        assert_eq!(lines[2], "200 OK page 2/2");
        assert_eq!(lines[3], "200 OK Two lines.");
        assert_eq!(lines[4], "400 ERR Page 9 is outside 1..=2");
        assert_eq!(lines[5], "400 ERR No service account configured");
        assert_eq!(lines[6], "400 ERR Unknown command: bogus");
        assert_eq!(lines[7], "200 OK hidden");
        assert_eq!(lines[8], "200 OK visible");
        assert_eq!(lines[9], "231 BYE");
        assert_eq!(lines.len(), 10);
    }

    #[tokio::test]
    async fn test_page_change_right_after_play_cancels_narration() {
        let backend = Arc::new(CountingBackend::default());
        let sink = Arc::new(CountingSink::default());
        let (b, k) = (backend.clone(), sink.clone());
        let navigator = navigator_with(move |tracker, bus| {
            NarrationController::new(
                Arc::new(FixedCredentials),
                b,
                k,
                tracker,
                bus,
                ControllerOptions::default(),
            )
        });

        let input: &[u8] = b"play\nnext\nquit\n";
        let mut output = Vec::new();
        run_session(input, &mut output, navigator.clone()).await.unwrap();

        let output = String::from_utf8(output).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines[1], "202 OK narrating page 1");
        assert_eq!(lines[2], "200 OK page 2/2");

        let controller = navigator.lock().await.controller().clone();
        tokio::time::timeout(Duration::from_secs(2), async {
            while controller.state() != PlaybackState::Idle {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(navigator.lock().await.current_page(), 2);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        assert_eq!(sink.loads.load(Ordering::SeqCst), 0);
    }
}
