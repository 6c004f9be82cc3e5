//! Capture mode enumeration and selection

use std::fmt;

use tracing::debug;
use v4l::frameinterval::FrameIntervalEnum;
use v4l::framesize::FrameSizeEnum;
use v4l::video::Capture;
use v4l::{Device, FourCC, Fraction};

/// One advertised combination of frame size and frame interval
#[derive(Debug, Clone, Copy)]
pub struct ModeCandidate {
    pub width: u32,
    pub height: u32,
    /// Frame interval as advertised by the driver (time per frame)
    pub interval: Fraction,
}

// Manual impl because `v4l::Fraction` does not derive `PartialEq`.
impl PartialEq for ModeCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.interval.numerator == other.interval.numerator
            && self.interval.denominator == other.interval.denominator
    }
}

impl ModeCandidate {
    /// Frame rate in frames per second
    pub fn fps(&self) -> f64 {
        if self.interval.numerator == 0 {
            return 0.0;
        }
        self.interval.denominator as f64 / self.interval.numerator as f64
    }

    /// Throughput score used for ranking, pixels per second
    pub fn score(&self) -> f64 {
        self.width as f64 * self.height as f64 * self.fps()
    }
}

impl fmt::Display for ModeCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}@{:.2}fps", self.width, self.height, self.fps())
    }
}

/// Enumerate all discrete modes a device advertises for a pixel format
///
/// Stepwise frame sizes are skipped; stepwise frame intervals contribute
/// their endpoints.
pub fn enumerate_modes(dev: &Device, fourcc: FourCC) -> std::io::Result<Vec<ModeCandidate>> {
    let mut candidates = Vec::new();

    for framesize in dev.enum_framesizes(fourcc)? {
        let (width, height) = match framesize.size {
            FrameSizeEnum::Discrete(d) => (d.width, d.height),
            FrameSizeEnum::Stepwise(_) => continue,
        };

        let intervals = match dev.enum_frameintervals(fourcc, width, height) {
            Ok(intervals) => intervals,
            Err(e) => {
                debug!("Interval query failed for {}x{}: {}", width, height, e);
                continue;
            }
        };

        for frameinterval in intervals {
            match frameinterval.interval {
                FrameIntervalEnum::Discrete(interval) => {
                    candidates.push(ModeCandidate {
                        width,
                        height,
                        interval,
                    });
                }
                FrameIntervalEnum::Stepwise(stepwise) => {
                    candidates.push(ModeCandidate {
                        width,
                        height,
                        interval: stepwise.min,
                    });
                    candidates.push(ModeCandidate {
                        width,
                        height,
                        interval: stepwise.max,
                    });
                }
            }
        }
    }

    Ok(candidates)
}

/// Pick the highest-throughput mode
///
/// Ranking is by `width * height * fps`; on equal scores the earliest
/// candidate wins, preserving the driver's advertised order.
pub fn select_best_mode(candidates: &[ModeCandidate]) -> Option<ModeCandidate> {
    let mut best: Option<ModeCandidate> = None;
    for candidate in candidates {
        match best {
            Some(current) if candidate.score() <= current.score() => {}
            _ => best = Some(*candidate),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mode(width: u32, height: u32, num: u32, den: u32) -> ModeCandidate {
        ModeCandidate {
            width,
            height,
            interval: Fraction::new(num, den),
        }
    }

    #[test]
    fn fps_from_interval() {
        assert_eq!(mode(1280, 720, 1, 60).fps(), 60.0);
        assert_eq!(mode(1280, 720, 1001, 30000).fps(), 30000.0 / 1001.0);
        assert_eq!(mode(1280, 720, 0, 30).fps(), 0.0);
    }

    #[test]
    fn highest_throughput_wins() {
        let candidates = [
            mode(640, 480, 1, 30),
            mode(1920, 1080, 1, 30),
            mode(1280, 720, 1, 60),
        ];
        let best = select_best_mode(&candidates).unwrap();
        // 1920x1080@30 scores above 1280x720@60.
        assert_eq!((best.width, best.height), (1920, 1080));
    }

    #[test]
    fn tie_keeps_first_candidate() {
        let candidates = [
            mode(1920, 1080, 1, 30),
            mode(1080, 1920, 1, 30),
        ];
        let best = select_best_mode(&candidates).unwrap();
        assert_eq!((best.width, best.height), (1920, 1080));
    }

    #[test]
    fn empty_candidate_list() {
        assert!(select_best_mode(&[]).is_none());
    }
}
