use crate::db::Repository;
use crate::error::Result;

/// Claims all classified, unassigned posts into a new briefing. Returns the
/// briefing id, or `None` when there was nothing to claim.
pub async fn generate_briefing(repo: &Repository) -> Result<Option<i64>> {
    match repo.claim_for_briefing().await? {
        Some(id) => {
            let count = repo
                .get_briefing(id)
                .await?
                .map(|b| b.post_count)
                .unwrap_or_default();
            tracing::info!("Generated briefing #{} with {} posts", id, count);
            Ok(Some(id))
        }
        None => {
            tracing::info!("No unassigned posts for briefing");
            Ok(None)
        }
    }
}
