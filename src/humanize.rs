//! Relative time rendering ("2 minutes ago", "in 8 hours").

use chrono::Duration;
use chrono_humanize::{Accuracy, HumanTime, Tense};

/// Describes `then` relative to `now`, both in Unix seconds.
pub fn relative_time(then: i64, now: i64) -> String {
    HumanTime::from(Duration::seconds(then - now)).to_text_en(Accuracy::Rough, Tense::Present)
}
