//! Abstract contract of the local audio engine.

use std::time::Instant;

use tracing::debug;

use crate::types::SessionInfo;

/// The local audio output device a [`Player`](crate::Player) drives.
///
/// The player converts wire samples to per-channel `f32` planes and
/// schedules each chunk against the engine's own clock; everything
/// about buffering, device selection and look-ahead stays behind this
/// trait.
pub trait AudioOutput: Send + Sync + 'static {
    /// Current value of the local audio clock, in seconds.
    fn now(&self) -> f64;

    /// A session is starting; be ready to accept buffered samples.
    fn begin(&mut self, session: &SessionInfo);

    /// Queue one chunk of audio: one `f32` plane in [-1, 1] per
    /// channel, to start playing at `start` on the audio clock.
    /// `start` is never in the past; late chunks arrive with
    /// `start == now`.
    fn schedule(&mut self, start: f64, planes: Vec<Vec<f32>>);

    /// The session ended; no more chunks until the next `begin`.
    fn end(&mut self);
}

/// An output that discards all audio.
///
/// Its clock runs from construction time. Useful for headless
/// receivers and tests that only care about scheduling decisions.
pub struct NullOutput {
    started: Instant,
}

impl NullOutput {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for NullOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioOutput for NullOutput {
    fn now(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    fn begin(&mut self, session: &SessionInfo) {
        debug!(
            session_id = %session.session_id,
            sample_rate = session.sample_rate,
            channels = session.channels,
            "Output: session begin"
        );
    }

    fn schedule(&mut self, start: f64, planes: Vec<Vec<f32>>) {
        debug!(
            start,
            channels = planes.len(),
            frames = planes.first().map(Vec::len).unwrap_or(0),
            "Output: chunk scheduled"
        );
    }

    fn end(&mut self) {
        debug!("Output: session end");
    }
}
