//! 质量评分器
//!
//! 由片段的问题列表确定性地计算 0-100 质量分。评分用于
//! 合规审计，同一问题列表必须永远得到同一分数。

use crate::model::{Issue, IssueSeverity, IssueStatus};

/// Open/Rejected 问题的扣分
fn open_penalty(severity: IssueSeverity) -> u32 {
    match severity {
        IssueSeverity::High => 10,
        IssueSeverity::Medium => 5,
        IssueSeverity::Low => 1,
    }
}

/// Resolved 问题的扣分：缺陷虽已修复，但确实存在过
fn resolved_penalty(severity: IssueSeverity) -> u32 {
    match severity {
        IssueSeverity::High => 5,
        IssueSeverity::Medium => 3,
        IssueSeverity::Low => 1,
    }
}

/// 计算质量分
///
/// 从100起扣，下限为0；无问题时恰好为100。Open 问题按
/// Rejected 同等扣分（未处理的缺陷与确认的缺陷同罪）。
pub fn quality_score(issues: &[Issue]) -> u8 {
    let mut penalty: u32 = 0;

    for issue in issues {
        penalty += match issue.status {
            IssueStatus::Open | IssueStatus::Rejected => open_penalty(issue.severity),
            IssueStatus::Resolved => resolved_penalty(issue.severity),
        };
    }

    100u32.saturating_sub(penalty) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IssueType;

    fn issue(severity: IssueSeverity, status: IssueStatus) -> Issue {
        let mut issue = Issue::new(IssueType::Accuracy, severity, "测试".to_string());
        issue.status = status;
        issue
    }

    #[test]
    fn empty_issue_list_scores_exactly_100() {
        assert_eq!(quality_score(&[]), 100);
    }

    #[test]
    fn worked_example_scores_86() {
        // HIGH被拒 -10, MEDIUM已解决 -3, LOW已解决 -1
        let issues = vec![
            issue(IssueSeverity::High, IssueStatus::Rejected),
            issue(IssueSeverity::Medium, IssueStatus::Resolved),
            issue(IssueSeverity::Low, IssueStatus::Resolved),
        ];
        assert_eq!(quality_score(&issues), 86);
    }

    #[test]
    fn open_counts_like_rejected() {
        let open = vec![issue(IssueSeverity::High, IssueStatus::Open)];
        let rejected = vec![issue(IssueSeverity::High, IssueStatus::Rejected)];
        assert_eq!(quality_score(&open), quality_score(&rejected));
    }

    #[test]
    fn score_is_monotone_under_more_open_issues() {
        let mut issues = Vec::new();
        let mut last = 100;
        for _ in 0..30 {
            issues.push(issue(IssueSeverity::Medium, IssueStatus::Open));
            let score = quality_score(&issues);
            assert!(score <= last, "score must be non-increasing");
            last = score;
        }
    }

    #[test]
    fn score_floors_at_zero() {
        let issues: Vec<Issue> = (0..20)
            .map(|_| issue(IssueSeverity::High, IssueStatus::Rejected))
            .collect();
        assert_eq!(quality_score(&issues), 0);
    }

    #[test]
    fn identical_lists_yield_identical_scores() {
        let issues = vec![
            issue(IssueSeverity::High, IssueStatus::Resolved),
            issue(IssueSeverity::Low, IssueStatus::Open),
        ];
        assert_eq!(quality_score(&issues), quality_score(&issues));
    }
}
