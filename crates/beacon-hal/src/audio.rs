//! Audio synthesis boundary.
//!
//! The native synthesizer is driven with `(source, listener, gain, pitch)`
//! once per guidance sample.  [`AudioDispatcher`] decouples the sensor
//! callback from that call: producers overwrite a single slot and a worker
//! task plays whatever is newest, so intermediate samples are coalesced away
//! but the latest parameters always reach the boundary.

use std::sync::Arc;

use beacon_types::GuidanceError;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// One set of spatial audio parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioCommand {
    /// Position of the virtual sound source (the target).
    pub source: [f32; 3],
    /// Position of the listener (the device).
    pub listener: [f32; 3],
    pub gain: f32,
    pub pitch: f32,
}

/// The native spatial audio engine.
///
/// `play` is expected to be lightweight or internally buffered, but it may
/// block; the dispatcher always calls it off the async worker threads.
pub trait AudioBoundary: Send + Sync + 'static {
    /// Bring the engine up. Called once before the first `play`.
    fn init(&self) -> Result<(), GuidanceError> {
        Ok(())
    }

    fn play(&self, command: &AudioCommand);

    /// Release the engine.
    fn kill(&self) {}
}

/// Audio boundary that only logs; used by headless hosts.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingAudio;

impl AudioBoundary for LoggingAudio {
    fn play(&self, command: &AudioCommand) {
        debug!(
            gain = command.gain,
            pitch = command.pitch,
            source = ?command.source,
            listener = ?command.listener,
            "audio"
        );
    }
}

/// Coalescing hand-off between the guidance loop and an [`AudioBoundary`].
pub struct AudioDispatcher {
    slot: watch::Sender<Option<AudioCommand>>,
    worker: JoinHandle<()>,
}

impl AudioDispatcher {
    /// Initialise `sink` and start the playback worker on `runtime`.
    pub fn spawn(sink: Arc<dyn AudioBoundary>, runtime: &Handle) -> Result<Self, GuidanceError> {
        sink.init()?;
        let (slot, mut rx) = watch::channel(None);

        let worker = runtime.spawn(async move {
            while rx.changed().await.is_ok() {
                let Some(command) = *rx.borrow_and_update() else {
                    continue;
                };
                let sink = Arc::clone(&sink);
                if let Err(e) = tokio::task::spawn_blocking(move || sink.play(&command)).await {
                    warn!(error = %e, "audio playback task failed");
                }
            }
            sink.kill();
            debug!("audio dispatcher stopped");
        });

        Ok(Self { slot, worker })
    }

    /// Replace the pending parameters. Never blocks.
    pub fn dispatch(&self, command: AudioCommand) {
        self.slot.send_replace(Some(command));
    }

    /// The most recently dispatched parameters.
    pub fn latest(&self) -> Option<AudioCommand> {
        *self.slot.borrow()
    }

    /// Stop accepting parameters and wait for the worker to finish the call
    /// in flight.
    pub async fn shutdown(self) {
        let Self { slot, worker } = self;
        drop(slot);
        if let Err(e) = worker.await {
            warn!(error = %e, "audio worker ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct RecordingAudio {
        played: Mutex<Vec<AudioCommand>>,
        notify: Notify,
        killed: AtomicBool,
        /// Hold each play call this long to simulate a slow engine.
        delay: Duration,
    }

    impl AudioBoundary for RecordingAudio {
        fn play(&self, command: &AudioCommand) {
            std::thread::sleep(self.delay);
            self.played.lock().unwrap().push(*command);
            self.notify.notify_one();
        }

        fn kill(&self) {
            self.killed.store(true, Ordering::SeqCst);
        }
    }

    struct BrokenAudio;

    impl AudioBoundary for BrokenAudio {
        fn init(&self) -> Result<(), GuidanceError> {
            Err(GuidanceError::Configuration("no audio device".into()))
        }

        fn play(&self, _command: &AudioCommand) {}
    }

    fn command(pitch: f32) -> AudioCommand {
        AudioCommand {
            source: [0.0, 5.0, 0.0],
            listener: [0.0, 0.0, 0.0],
            gain: 0.75,
            pitch,
        }
    }

    async fn wait_for_pitch(sink: &RecordingAudio, pitch: f32) {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let notified = sink.notify.notified();
                if sink.played.lock().unwrap().last().map(|c| c.pitch) == Some(pitch) {
                    return;
                }
                notified.await;
            }
        })
        .await
        .expect("latest command never reached the sink");
    }

    #[tokio::test]
    async fn single_command_is_played() {
        let sink = Arc::new(RecordingAudio::default());
        let dispatcher = AudioDispatcher::spawn(sink.clone(), &Handle::current()).unwrap();

        dispatcher.dispatch(command(512.0));
        wait_for_pitch(&sink, 512.0).await;
        assert_eq!(dispatcher.latest(), Some(command(512.0)));

        dispatcher.shutdown().await;
        assert!(sink.killed.load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn burst_is_coalesced_to_latest() {
        let sink = Arc::new(RecordingAudio {
            delay: Duration::from_millis(20),
            ..Default::default()
        });
        let dispatcher = AudioDispatcher::spawn(sink.clone(), &Handle::current()).unwrap();

        for i in 0..50 {
            dispatcher.dispatch(command(i as f32));
        }
        wait_for_pitch(&sink, 49.0).await;

        let played = sink.played.lock().unwrap().clone();
        assert!(played.len() < 50, "burst must be coalesced, got {} plays", played.len());
        assert_eq!(played.last().map(|c| c.pitch), Some(49.0));
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn failing_init_is_reported() {
        let result = AudioDispatcher::spawn(Arc::new(BrokenAudio), &Handle::current());
        assert!(matches!(result, Err(GuidanceError::Configuration(_))));
    }
}
