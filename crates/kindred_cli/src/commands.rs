//! One-shot subcommands. Each prints to stdout and returns.

use anyhow::Result;
use chrono::{Duration, NaiveDate};

use kindred_memory::{CompanionCoordinator, CompanionStatus, DecayOutcome};

pub async fn status(coordinator: &CompanionCoordinator, json: bool) -> Result<()> {
    let status = coordinator.status().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print!("{}", render_status(&coordinator.config().persona.name, &status));
    }
    Ok(())
}

pub fn render_status(name: &str, s: &CompanionStatus) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{}: {} (valence {:+.2}), energy {} ({:.2}), bond {} ({:.2})\n",
        name,
        s.state.mood_label(),
        s.state.valence,
        s.state.energy_label(),
        s.state.energy,
        s.state.bond_label(),
        s.state.bond
    ));
    if let Some(reflection) = &s.state.reflection {
        out.push_str(&format!("Thinking: {}\n", reflection));
    }
    let r = &s.relationship;
    out.push_str(&format!(
        "Level {} ({}), xp {}/{} total {}, trust {:.3}, {} active day(s)\n",
        r.level,
        s.maturity.as_str(),
        r.current_xp,
        s.next_level_xp,
        r.total_xp,
        r.trust_score,
        r.days_active
    ));
    match &s.current_session {
        Some(session) => out.push_str(&format!(
            "Session {} ({}), {} message(s)\n",
            session.session_id,
            session.session_type.as_str(),
            session.message_count
        )),
        None => out.push_str("No open session\n"),
    }
    let stats = &s.session_stats;
    out.push_str(&format!(
        "Last 7 days: {} session(s), {:.1} messages each, mostly {}\n",
        stats.total_sessions,
        stats.avg_messages,
        stats.most_common_type.map(|t| t.as_str()).unwrap_or("none")
    ));
    out.push_str(&format!("Memories: {}\n", s.memory_count));
    let q = &s.response_quality;
    if q.evaluations > 0 {
        out.push_str(&format!(
            "Self-rating over {} repl(ies): relevance {:.1}, creativity {:.1}, personality {:.1}\n",
            q.evaluations, q.relevance, q.creativity, q.personality
        ));
    }
    out
}

/// Consolidate `date`, or yesterday when no date is given.
pub async fn consolidate(
    coordinator: &CompanionCoordinator,
    date: Option<NaiveDate>,
) -> Result<()> {
    let date = date.unwrap_or_else(|| coordinator.db().now().date_naive() - Duration::days(1));
    match coordinator.consolidation().consolidate_day(date).await? {
        Some(report) => {
            println!(
                "Consolidated {}: {} message(s) in {} session(s), {} memories archived ({})",
                report.date,
                report.total_messages,
                report.session_count,
                report.archived,
                report.method.as_str()
            );
            if !report.key_topics.is_empty() {
                println!("Topics: {}", report.key_topics.join(", "));
            }
            for p in &report.patterns {
                let tag = if p.is_new { "new" } else { "seen" };
                println!("Pattern ({}, x{}): {}", tag, p.frequency, p.description);
            }
        }
        None => println!("No messages on {}, nothing to consolidate.", date),
    }
    Ok(())
}

pub async fn decay(coordinator: &CompanionCoordinator, force: bool) -> Result<()> {
    let outcome = if force {
        coordinator.decay().run_now().await?
    } else {
        coordinator.decay().run_if_due().await?
    };
    match outcome {
        DecayOutcome::Ran { decayed, pruned } => {
            println!("Decay ran: {} memories faded, {} pruned.", decayed, pruned)
        }
        DecayOutcome::Skipped { seconds_since_last } => println!(
            "Decay skipped: last run {}s ago (use --force to run anyway).",
            seconds_since_last
        ),
    }
    Ok(())
}

pub async fn patterns(coordinator: &CompanionCoordinator) -> Result<()> {
    let patterns = coordinator.patterns().all().await?;
    if patterns.is_empty() {
        println!("No patterns yet.");
    }
    for p in patterns {
        println!(
            "[{}] {} (confidence {:.2}, seen {}x)",
            p.pattern_type, p.description, p.confidence_score, p.frequency
        );
    }
    Ok(())
}

/// With a query this is a real recall, so the hits get reinforced.
pub async fn memories(
    coordinator: &CompanionCoordinator,
    query: Option<&str>,
    limit: u32,
) -> Result<()> {
    let episodic = coordinator.episodic();
    let rows = match query {
        Some(q) => episodic.retrieve_by_context(q, limit).await?,
        None => episodic.retrieve_important(limit).await?,
    };
    if rows.is_empty() {
        println!("No memories.");
    }
    for m in rows {
        let mark = if m.is_core { "*" } else { " " };
        println!(
            "{}#{:<4} [{}] imp {} {} | {}",
            mark, m.id, m.day_date, m.importance, m.emotion_tone, m.content
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use kindred_core::{BotState, MaturityStage, RelationshipState};
    use kindred_memory::{QualityAverages, SessionStats};

    #[test]
    fn test_render_status_without_session() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
        let status = CompanionStatus {
            state: BotState::default(),
            relationship: RelationshipState::fresh(today),
            maturity: MaturityStage::Teenage,
            next_level_xp: 100,
            current_session: None,
            session_stats: SessionStats {
                total_sessions: 0,
                avg_messages: 0.0,
                most_common_type: None,
            },
            memory_count: 3,
            response_quality: QualityAverages::default(),
        };
        let text = render_status("Linh", &status);
        assert!(text.starts_with("Linh: "));
        assert!(text.contains("Level 1"));
        assert!(text.contains("xp 0/100"));
        assert!(text.contains("No open session"));
        assert!(text.contains("mostly none"));
        assert!(text.contains("Memories: 3"));
        assert!(!text.contains("Self-rating"));
    }

    #[test]
    fn test_render_status_with_self_rating() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
        let status = CompanionStatus {
            state: BotState::default(),
            relationship: RelationshipState::fresh(today),
            maturity: MaturityStage::Teenage,
            next_level_xp: 100,
            current_session: None,
            session_stats: SessionStats {
                total_sessions: 1,
                avg_messages: 2.0,
                most_common_type: None,
            },
            memory_count: 0,
            response_quality: QualityAverages {
                evaluations: 2,
                relevance: 4.5,
                creativity: 3.0,
                personality: 5.0,
            },
        };
        let text = render_status("Linh", &status);
        assert!(text.contains(
            "Self-rating over 2 repl(ies): relevance 4.5, creativity 3.0, personality 5.0"
        ));
    }
}
