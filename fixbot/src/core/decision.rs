//! Turns a parsed model verdict into an [`Analysis`].

use chrono::{DateTime, Utc};

use crate::core::response::ModelVerdict;
use crate::core::types::{Analysis, CodeChange, FixProposal, ProposalStatus};

/// Verdicts below this confidence never become proposals.
pub const CONFIDENCE_FLOOR: u8 = 70;

/// Apply the confidence floor and build a pending proposal when the verdict allows it.
pub fn decide(issue_number: u64, verdict: ModelVerdict, id: String, now: DateTime<Utc>) -> Analysis {
    let confidence = verdict.confidence_percent();
    let reason = verdict.reason.trim().to_string();
    if !verdict.should_fix {
        let reason = if reason.is_empty() {
            "model declined to propose a fix".to_string()
        } else {
            reason
        };
        return Analysis::no_fix(confidence, reason);
    }
    if confidence < CONFIDENCE_FLOOR {
        return Analysis::no_fix(
            confidence,
            format!(
                "confidence {confidence}% is below the {CONFIDENCE_FLOOR}% threshold; {}",
                if reason.is_empty() { "no reason given" } else { &reason }
            ),
        );
    }
    let Some(fix) = verdict.fix.filter(|f| !f.code_changes.is_empty()) else {
        return Analysis::no_fix(confidence, "model proposed a fix without any code changes");
    };
    let code_changes = fix
        .code_changes
        .into_iter()
        .map(|c| CodeChange {
            file_path: c.file_path,
            original_code: c.original_code.unwrap_or_default(),
            new_code: c.new_code,
            explanation: c.explanation.unwrap_or_default(),
        })
        .collect();
    let description = if fix.description.trim().is_empty() {
        reason.clone()
    } else {
        fix.description
    };
    Analysis {
        should_fix: true,
        confidence,
        reason,
        proposal: Some(FixProposal {
            id,
            issue_number,
            title: fix.title,
            description,
            code_changes,
            confidence,
            created_at: now,
            status: ProposalStatus::Pending,
            branch: None,
            pr_url: None,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::response::{ModelChange, ModelFix};

    fn verdict(should_fix: bool, confidence: f64, changes: usize) -> ModelVerdict {
        ModelVerdict {
            should_fix,
            confidence,
            reason: "null deref in parser".to_string(),
            fix: Some(ModelFix {
                title: "Guard empty input".to_string(),
                description: String::new(),
                code_changes: (0..changes)
                    .map(|i| ModelChange {
                        file_path: format!("src/f{i}.ts"),
                        original_code: None,
                        new_code: "x".to_string(),
                        explanation: None,
                    })
                    .collect(),
            }),
        }
    }

    #[test]
    fn below_floor_is_no_fix() {
        let analysis = decide(1, verdict(true, 65.0, 1), "fix-1".to_string(), Utc::now());
        assert!(!analysis.should_fix);
        assert!(analysis.proposal.is_none());
        assert_eq!(analysis.confidence, 65);
        assert!(analysis.reason.contains("below the 70% threshold"));
    }

    #[test]
    fn at_floor_creates_pending_proposal() {
        let analysis = decide(7, verdict(true, 70.0, 2), "fix-1".to_string(), Utc::now());
        let proposal = analysis.proposal.expect("proposal");
        assert_eq!(proposal.status, ProposalStatus::Pending);
        assert_eq!(proposal.issue_number, 7);
        assert_eq!(proposal.code_changes.len(), 2);
        assert_eq!(proposal.code_changes[0].original_code, "");
        assert_eq!(proposal.description, "null deref in parser");
    }

    #[test]
    fn declined_or_empty_fixes_are_no_fix() {
        assert!(decide(1, verdict(false, 95.0, 1), "a".into(), Utc::now()).proposal.is_none());
        let empty = decide(1, verdict(true, 95.0, 0), "a".into(), Utc::now());
        assert!(!empty.should_fix);
        assert!(empty.reason.contains("without any code changes"));
    }

    #[test]
    fn confidence_is_clamped() {
        let analysis = decide(1, verdict(true, 250.0, 1), "a".into(), Utc::now());
        assert_eq!(analysis.confidence, 100);
    }
}
