//! Job priority for the processing queue. Higher is dequeued first.

use crate::models::Account;

pub const PRIORITY_MIN: i32 = 1;
pub const PRIORITY_MAX: i32 = 10;
pub const PRIORITY_NORMAL: i32 = 5;
pub const PRIORITY_ELEVATED: i32 = 8;

const SHORT_VIDEO_SECS: i32 = 5 * 60;
const LONG_VIDEO_SECS: i32 = 30 * 60;
const ACTIVE_ACCOUNT_VIDEOS: i64 = 50;

/// Inputs known at dispatch time.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriorityInput<'a> {
    pub account: Option<&'a Account>,
    /// Seconds, when already probed.
    pub duration: Option<i32>,
}

pub fn priority_for(input: PriorityInput<'_>) -> i32 {
    let mut priority = match input.account {
        // an explicit value never drops an elevated account below standard
        Some(account) if account.is_elevated() => account
            .priority
            .map_or(PRIORITY_ELEVATED, |p| p.max(PRIORITY_NORMAL)),
        _ => PRIORITY_NORMAL,
    };

    if let Some(duration) = input.duration {
        if duration < SHORT_VIDEO_SECS {
            priority += 1;
        } else if duration > LONG_VIDEO_SECS {
            priority -= 1;
        }
    }

    if input
        .account
        .is_some_and(|a| a.video_count > ACTIVE_ACCOUNT_VIDEOS)
    {
        priority += 1;
    }

    priority.clamp(PRIORITY_MIN, PRIORITY_MAX)
}

pub fn priority_label(priority: i32) -> &'static str {
    match priority {
        10.. => "critical",
        7..=9 => "high",
        4..=6 => "normal",
        2..=3 => "low",
        _ => "bulk",
    }
}

/// A job waiting in the queue, in submission order via `sequence`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedPriority {
    pub priority: i32,
    pub sequence: u64,
}

/// Pending jobs that will be dequeued before `job`: same or higher
/// priority and submitted earlier.
pub fn queue_position(pending: &[QueuedPriority], job: QueuedPriority) -> usize {
    pending
        .iter()
        .filter(|p| p.priority >= job.priority && p.sequence < job.sequence)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(premium: bool, videos: i64) -> Account {
        Account {
            is_premium: premium,
            video_count: videos,
            ..Account::default()
        }
    }

    #[test]
    fn short_video_from_active_account() {
        let acc = account(false, 60);
        let p = priority_for(PriorityInput {
            account: Some(&acc),
            duration: Some(180),
        });
        assert_eq!(p, 7);
    }

    #[test]
    fn no_account_no_duration_is_normal() {
        assert_eq!(priority_for(PriorityInput::default()), PRIORITY_NORMAL);
    }

    #[test]
    fn long_video_loses_a_point() {
        let acc = account(false, 10);
        let p = priority_for(PriorityInput {
            account: Some(&acc),
            duration: Some(45 * 60),
        });
        assert_eq!(p, 4);
    }

    #[test]
    fn explicit_priority_overrides_elevated_base_and_is_clamped() {
        let acc = Account {
            is_premium: true,
            priority: Some(10),
            video_count: 100,
            ..Account::default()
        };
        let p = priority_for(PriorityInput {
            account: Some(&acc),
            duration: Some(60),
        });
        assert_eq!(p, PRIORITY_MAX);
    }

    #[test]
    fn elevated_never_below_standard() {
        for videos in [0, 10, 51, 200] {
            for duration in [None, Some(10), Some(600), Some(4000)] {
                let standard = account(false, videos);
                let premium = account(true, videos);
                let staff = Account {
                    is_staff: true,
                    ..standard.clone()
                };
                let base = priority_for(PriorityInput {
                    account: Some(&standard),
                    duration,
                });
                for elevated in [&premium, &staff] {
                    assert!(
                        priority_for(PriorityInput {
                            account: Some(elevated),
                            duration,
                        }) >= base
                    );
                }
            }
        }
    }

    #[test]
    fn labels() {
        assert_eq!(priority_label(10), "critical");
        assert_eq!(priority_label(8), "high");
        assert_eq!(priority_label(5), "normal");
        assert_eq!(priority_label(2), "low");
        assert_eq!(priority_label(1), "bulk");
    }

    #[test]
    fn position_counts_earlier_jobs_at_or_above() {
        let pending = [
            QueuedPriority { priority: 5, sequence: 1 },
            QueuedPriority { priority: 3, sequence: 2 },
            QueuedPriority { priority: 7, sequence: 3 },
            QueuedPriority { priority: 9, sequence: 5 },
        ];
        let job = QueuedPriority { priority: 5, sequence: 4 };
        assert_eq!(queue_position(&pending, job), 2);
    }
}
