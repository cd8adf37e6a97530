//! Snapshot of every valid user id

use anyhow::Result;
use membership_store::IdentityDirectory;
use std::collections::HashSet;
use tracing::{debug, info};

/// Users requested per page
pub const USER_PAGE_SIZE: usize = 1000;

/// List every user id known to the directory.
///
/// Pages are requested until the directory stops returning a cursor. Any
/// failed page aborts the listing; a partial set is never returned.
pub async fn list_all_user_ids(directory: &dyn IdentityDirectory) -> Result<HashSet<String>> {
    list_all_user_ids_paged(directory, USER_PAGE_SIZE).await
}

pub async fn list_all_user_ids_paged(
    directory: &dyn IdentityDirectory,
    page_size: usize,
) -> Result<HashSet<String>> {
    let mut user_ids = HashSet::new();
    let mut next_page_token: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let page = directory
            .list_users(page_size, next_page_token.as_deref())
            .await?;
        pages += 1;
        user_ids.extend(page.user_ids);
        debug!("Fetched user page {} ({} ids so far)", pages, user_ids.len());

        match page.next_page_token {
            Some(token) if !token.is_empty() => next_page_token = Some(token),
            _ => break,
        }
    }

    info!("Listed {} user ids in {} pages", user_ids.len(), pages);
    Ok(user_ids)
}
