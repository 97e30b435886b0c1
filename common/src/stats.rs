//! 履歴のクイック統計

use crate::types::{AppleVariety, ScanHistoryItem};
use chrono::{DateTime, Utc};

/// 履歴から算出する統計値
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryStats {
    pub total_scans: usize,
    pub last_scan: Option<DateTime<Utc>>,
    pub most_scanned_variety: Option<AppleVariety>,
}

impl HistoryStats {
    pub fn from_history(history: &[ScanHistoryItem]) -> Self {
        let last_scan = history.iter().map(|item| item.timestamp).max();

        // 同数の場合は AppleVariety::ALL の順で先のものを採用
        let most_scanned_variety = AppleVariety::ALL
            .iter()
            .map(|v| (*v, history.iter().filter(|item| item.variety == *v).count()))
            .filter(|(_, count)| *count > 0)
            .fold(None::<(AppleVariety, usize)>, |best, current| match best {
                Some(b) if b.1 >= current.1 => Some(b),
                _ => Some(current),
            })
            .map(|(v, _)| v);

        Self {
            total_scans: history.len(),
            last_scan,
            most_scanned_variety,
        }
    }

    /// 最終スキャンからの経過時間（"3 hours ago" / "never"）
    pub fn last_scan_relative(&self, now: DateTime<Utc>) -> String {
        let Some(last) = self.last_scan else {
            return "never".to_string();
        };

        let seconds = (now - last).num_seconds().max(0);
        let (value, unit) = match seconds {
            s if s < 60 => return "just now".to_string(),
            s if s < 3_600 => (s / 60, "minute"),
            s if s < 86_400 => (s / 3_600, "hour"),
            s if s < 2_592_000 => (s / 86_400, "day"),
            s if s < 31_536_000 => (s / 2_592_000, "month"),
            s => (s / 31_536_000, "year"),
        };

        if value == 1 {
            format!("1 {} ago", unit)
        } else {
            format!("{} {}s ago", value, unit)
        }
    }

    /// 最多品種の表示名（履歴が空なら "none"）
    pub fn most_scanned_display(&self) -> &'static str {
        self.most_scanned_variety
            .map(|v| v.display_name())
            .unwrap_or("none")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OxidationLevel;
    use chrono::{Duration, TimeZone};

    fn item(id: &str, variety: AppleVariety, ts: DateTime<Utc>) -> ScanHistoryItem {
        ScanHistoryItem {
            id: id.to_string(),
            image_uri: String::new(),
            variety,
            days_since_cut: 1.0,
            oxidation_level: OxidationLevel::Minimal,
            confidence_lower: 0.5,
            confidence_upper: 1.5,
            interpretation: String::new(),
            timestamp: ts,
        }
    }

    #[test]
    fn test_stats_empty() {
        let stats = HistoryStats::from_history(&[]);
        assert_eq!(stats.total_scans, 0);
        assert_eq!(stats.most_scanned_display(), "none");
        assert_eq!(stats.last_scan_relative(Utc::now()), "never");
    }

    #[test]
    fn test_stats_most_scanned() {
        let base = Utc.with_ymd_and_hms(2025, 5, 1, 8, 0, 0).unwrap();
        let history = vec![
            item("3", AppleVariety::Smith, base + Duration::hours(2)),
            item("2", AppleVariety::Gala, base + Duration::hours(1)),
            item("1", AppleVariety::Smith, base),
        ];

        let stats = HistoryStats::from_history(&history);
        assert_eq!(stats.total_scans, 3);
        assert_eq!(stats.most_scanned_variety, Some(AppleVariety::Smith));
        assert_eq!(stats.most_scanned_display(), "G. Smith");
        assert_eq!(stats.last_scan, Some(base + Duration::hours(2)));
    }

    #[test]
    fn test_stats_tie_prefers_declaration_order() {
        let base = Utc.with_ymd_and_hms(2025, 5, 1, 8, 0, 0).unwrap();
        let history = vec![
            item("2", AppleVariety::RedDelicious, base),
            item("1", AppleVariety::Gala, base),
        ];

        let stats = HistoryStats::from_history(&history);
        assert_eq!(stats.most_scanned_variety, Some(AppleVariety::Gala));
    }

    #[test]
    fn test_last_scan_relative() {
        let base = Utc.with_ymd_and_hms(2025, 5, 1, 8, 0, 0).unwrap();
        let stats = HistoryStats::from_history(&[item("1", AppleVariety::Gala, base)]);

        assert_eq!(stats.last_scan_relative(base + Duration::seconds(10)), "just now");
        assert_eq!(stats.last_scan_relative(base + Duration::minutes(1)), "1 minute ago");
        assert_eq!(stats.last_scan_relative(base + Duration::hours(5)), "5 hours ago");
        assert_eq!(stats.last_scan_relative(base + Duration::days(3)), "3 days ago");
    }
}
