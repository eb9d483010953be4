//! Checks run once per job before anything is uploaded.

use super::InjectError;
use crate::model::{Request, Status};
use crate::store::Repo;

/// Another request of the same campaign producing the same dataset name and
/// process string, already past `new`, would collide with this one.
pub async fn check_collisions(repo: &Repo, request: &Request) -> Result<(), InjectError> {
    if request.dataset_name().is_empty() {
        return Ok(());
    }

    let siblings: Vec<Request> = repo
        .query("member_of_campaign", request.campaign())
        .await?;
    let collisions: Vec<&str> = siblings
        .iter()
        .filter(|other| other.prepid() != request.prepid())
        .filter(|other| other.status() != Status::New)
        .filter(|other| {
            other.dataset_name() == request.dataset_name()
                && other.process_string() == request.process_string()
        })
        .map(Request::prepid)
        .collect();

    if collisions.is_empty() {
        Ok(())
    } else {
        Err(InjectError::Validation(format!(
            "Request {} has the same dataset name ({}) and process string ({}) as {}",
            request.prepid(),
            request.dataset_name(),
            request.process_string(),
            collisions.join(", ")
        )))
    }
}
