use std::collections::BTreeSet;

use crate::db::Repository;
use crate::error::Result;
use crate::models::MustReadAccount;

/// Tags unclassified posts from must-read accounts before the classifier
/// sees them. Returns how many posts were tagged; no accounts means no-op.
pub async fn tag_must_reads(repo: &Repository, accounts: &[MustReadAccount]) -> Result<usize> {
    let handles: BTreeSet<String> = accounts
        .iter()
        .map(MustReadAccount::normalized)
        .filter(|h| !h.is_empty())
        .collect();

    if handles.is_empty() {
        return Ok(0);
    }

    let tagged = repo.tag_must_reads(handles.into_iter().collect()).await?;
    if tagged > 0 {
        tracing::info!("Tagged {} must-read posts", tagged);
    }
    Ok(tagged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MUST_READ;
    use crate::test_support::new_post as post;

    fn account(handle: &str) -> MustReadAccount {
        MustReadAccount {
            handle: handle.to_string(),
        }
    }

    #[tokio::test]
    async fn normalizes_configured_handles() {
        let repo = Repository::open_in_memory().await.unwrap();
        repo.store_posts(vec![post("1", "Alice"), post("2", "bob"), post("3", "carol")])
            .await
            .unwrap();

        let tagged = tag_must_reads(&repo, &[account(" @ALICE"), account("bob"), account("@bob")])
            .await
            .unwrap();

        assert_eq!(tagged, 2);
        assert_eq!(
            repo.get_post("1").await.unwrap().unwrap().category.as_deref(),
            Some(MUST_READ)
        );
        assert!(repo.get_post("3").await.unwrap().unwrap().category.is_none());
    }

    #[tokio::test]
    async fn no_accounts_is_a_no_op() {
        let repo = Repository::open_in_memory().await.unwrap();
        repo.store_posts(vec![post("1", "alice")]).await.unwrap();

        assert_eq!(tag_must_reads(&repo, &[]).await.unwrap(), 0);
        assert_eq!(tag_must_reads(&repo, &[account("@")]).await.unwrap(), 0);
        assert!(repo.get_post("1").await.unwrap().unwrap().category.is_none());
    }
}
