//! Capture controller: camera stream ownership and the periodic frame sampler.

use std::time::Duration;

use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use crate::capability::{Camera, CameraError, Frame, StreamState, VideoStream};

/// Owns an open camera stream and stops it exactly once, either through
/// [`StreamGuard::release`] or on drop.
pub struct StreamGuard<S: VideoStream> {
    stream: S,
    released: bool,
}

impl<S: VideoStream> StreamGuard<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            released: false,
        }
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.stream.stop();
        self.released = true;
        tracing::debug!("camera stream released");
    }
}

impl<S: VideoStream> Drop for StreamGuard<S> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Open the camera at the requested resolution and wrap the stream in a guard.
pub async fn acquire<C: Camera>(
    camera: &mut C,
    width: u32,
    height: u32,
) -> Result<StreamGuard<C::Stream>, CameraError> {
    let stream = camera.open(width, height).await?;
    tracing::info!(width, height, "camera stream acquired");
    Ok(StreamGuard::new(stream))
}

/// Fixed-period frame sampler.
///
/// The first tick fires one full period after start. Dropping the sampler
/// cancels the timer; no tick is delivered afterwards.
pub struct FrameSampler {
    interval: Interval,
    ticks: u64,
}

impl FrameSampler {
    pub fn start(period: Duration) -> Self {
        let mut interval = time::interval_at(Instant::now() + period, period);
        // A slow detection call delays the schedule instead of bursting.
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval, ticks: 0 }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Wait for the next tick and grab the current frame.
    ///
    /// Returns `None` when the stream is paused, ended or has no frame yet;
    /// such a tick is a no-op, not an error.
    pub async fn sample<S: VideoStream>(&mut self, stream: &mut S) -> Option<Frame> {
        self.interval.tick().await;
        self.ticks += 1;
        if stream.state() != StreamState::Playing {
            tracing::trace!(
                tick = self.ticks,
                state = ?stream.state(),
                "stream not playing, skipping tick"
            );
            return None;
        }
        stream.current_frame()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct TestStream {
        state: StreamState,
        stops: Rc<Cell<u32>>,
    }

    impl VideoStream for TestStream {
        fn state(&self) -> StreamState {
            self.state
        }

        fn current_frame(&mut self) -> Option<Frame> {
            Some(Frame {
                data: vec![0; 12],
                width: 2,
                height: 2,
            })
        }

        fn stop(&mut self) {
            self.stops.set(self.stops.get() + 1);
            self.state = StreamState::Ended;
        }
    }

    fn stream(state: StreamState) -> (TestStream, Rc<Cell<u32>>) {
        let stops = Rc::new(Cell::new(0));
        (
            TestStream {
                state,
                stops: stops.clone(),
            },
            stops,
        )
    }

    #[test]
    fn test_guard_stops_stream_on_drop() {
        let (s, stops) = stream(StreamState::Playing);
        {
            let _guard = StreamGuard::new(s);
        }
        assert_eq!(stops.get(), 1);
    }

    #[test]
    fn test_release_is_idempotent() {
        let (s, stops) = stream(StreamState::Playing);
        let mut guard = StreamGuard::new(s);
        guard.release();
        guard.release();
        assert!(guard.is_released());
        drop(guard);
        assert_eq!(stops.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_after_one_period() {
        let (mut s, _) = stream(StreamState::Playing);
        let start = Instant::now();
        let mut sampler = FrameSampler::start(Duration::from_millis(200));
        assert!(sampler.sample(&mut s).await.is_some());
        assert!(start.elapsed() >= Duration::from_millis(200));
        assert!(start.elapsed() < Duration::from_millis(400));
        sampler.sample(&mut s).await;
        assert!(start.elapsed() >= Duration::from_millis(400));
        assert_eq!(sampler.ticks(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_or_ended_stream_is_noop() {
        let mut sampler = FrameSampler::start(Duration::from_millis(200));
        let (mut paused, _) = stream(StreamState::Paused);
        assert!(sampler.sample(&mut paused).await.is_none());
        let (mut ended, _) = stream(StreamState::Ended);
        assert!(sampler.sample(&mut ended).await.is_none());
        assert_eq!(sampler.ticks(), 2);
    }
}
