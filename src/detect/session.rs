//! Timeout-enforcing detector session.
//!
//! The detector runs on its own thread for the lifetime of one video. Each
//! request carries a sequence number; when a call outlives its timeout the
//! caller moves on and the late response is dropped on arrival. Dropping the
//! session closes the request channel, the thread finishes any in-flight call
//! and releases the detector.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use super::backend::GroundingDetector;
use crate::bbox::CenterBox;
use crate::frame::Frame;

/// Result of one detector call as seen by the localizer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DetectOutcome {
    Found(CenterBox),
    NotFound,
    Failed(String),
    TimedOut,
}

impl DetectOutcome {
    pub fn found(&self) -> Option<CenterBox> {
        match self {
            DetectOutcome::Found(bbox) => Some(*bbox),
            _ => None,
        }
    }
}

struct DetectRequest {
    seq: u64,
    frame: Arc<Frame>,
    phrase: Arc<str>,
}

struct DetectResponse {
    seq: u64,
    result: Result<Option<CenterBox>>,
}

pub struct DetectorSession {
    backend: &'static str,
    requests: Option<Sender<DetectRequest>>,
    responses: Receiver<DetectResponse>,
    seq: u64,
    timeout: Duration,
}

impl DetectorSession {
    /// Move `detector` onto a dedicated thread.
    pub fn spawn(mut detector: Box<dyn GroundingDetector>, timeout: Duration) -> Result<Self> {
        let backend = detector.name();
        let (req_tx, req_rx) = mpsc::channel::<DetectRequest>();
        let (resp_tx, resp_rx) = mpsc::channel::<DetectResponse>();

        thread::Builder::new()
            .name(format!("detector-{backend}"))
            .spawn(move || {
                if let Err(e) = detector.warm_up() {
                    log::warn!("detector {} warm-up failed: {}", backend, e);
                }
                for req in req_rx {
                    let result = detector.detect(&req.frame, &req.phrase);
                    if resp_tx
                        .send(DetectResponse {
                            seq: req.seq,
                            result,
                        })
                        .is_err()
                    {
                        break;
                    }
                }
            })
            .context("spawn detector thread")?;

        Ok(Self {
            backend,
            requests: Some(req_tx),
            responses: resp_rx,
            seq: 0,
            timeout,
        })
    }

    pub fn backend(&self) -> &'static str {
        self.backend
    }

    /// Run one detection, waiting at most the session timeout.
    pub fn detect(&mut self, frame: Arc<Frame>, phrase: Arc<str>) -> DetectOutcome {
        self.seq += 1;
        let seq = self.seq;
        let Some(requests) = self.requests.as_ref() else {
            return DetectOutcome::Failed("detector session closed".to_string());
        };
        if requests.send(DetectRequest { seq, frame, phrase }).is_err() {
            self.requests = None;
            return DetectOutcome::Failed("detector thread exited".to_string());
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.responses.recv_timeout(remaining) {
                Ok(resp) if resp.seq == seq => {
                    return match resp.result {
                        Ok(Some(bbox)) => DetectOutcome::Found(bbox),
                        Ok(None) => DetectOutcome::NotFound,
                        Err(e) => DetectOutcome::Failed(format!("{e:#}")),
                    };
                }
                // late answer to a call that already timed out
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout) => return DetectOutcome::TimedOut,
                Err(RecvTimeoutError::Disconnected) => {
                    self.requests = None;
                    return DetectOutcome::Failed("detector thread exited".to_string());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    struct SlowDetector {
        delay: Duration,
    }

    impl GroundingDetector for SlowDetector {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn detect(&mut self, frame: &Frame, phrase: &str) -> Result<Option<CenterBox>> {
            thread::sleep(self.delay);
            if phrase.is_empty() {
                return Ok(None);
            }
            if phrase == "boom" {
                return Err(anyhow!("model crashed"));
            }
            Ok(Some(CenterBox::new(frame.index() as i32, 0, 4, 4)))
        }
    }

    fn frame(index: u32) -> Arc<Frame> {
        Arc::new(Frame::new(index, 1, 1, vec![0, 0, 0]).unwrap())
    }

    #[test]
    fn maps_backend_results() {
        let mut session = DetectorSession::spawn(
            Box::new(SlowDetector {
                delay: Duration::ZERO,
            }),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            session.detect(frame(3), Arc::from("cat")),
            DetectOutcome::Found(CenterBox::new(3, 0, 4, 4))
        );
        assert_eq!(
            session.detect(frame(4), Arc::from("")),
            DetectOutcome::NotFound
        );
        assert!(matches!(
            session.detect(frame(5), Arc::from("boom")),
            DetectOutcome::Failed(_)
        ));
    }

    #[test]
    fn slow_call_times_out_and_late_answer_is_discarded() {
        let mut session = DetectorSession::spawn(
            Box::new(SlowDetector {
                delay: Duration::from_millis(150),
            }),
            Duration::from_millis(20),
        )
        .unwrap();
        assert_eq!(
            session.detect(frame(1), Arc::from("cat")),
            DetectOutcome::TimedOut
        );

        session.timeout = Duration::from_secs(5);
        // the frame-1 answer arrives first and must not be mistaken for frame 2
        assert_eq!(
            session.detect(frame(2), Arc::from("cat")),
            DetectOutcome::Found(CenterBox::new(2, 0, 4, 4))
        );
    }
}
