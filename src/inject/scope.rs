//! What one injection job covers, and how its results are written back.

use super::{InjectError, InjectionKind, Services};
use crate::model::{Approval, ChainedRequest, HistoryEntry, Request, RequestManager, Status};
use crate::notify::Notification;
use crate::store::{INDEX_CONTAINS, Repo};
use std::collections::{HashMap, HashSet};
use tracing::{error, info};

pub(crate) struct Scope {
    pub requests: Vec<Request>,
    /// Name the batch id is allocated under.
    pub batch_name: String,
    /// Prepid recorded in batch history and workflow references.
    pub task_name: String,
    /// Chains being advanced; empty for single requests.
    pub chains: Vec<ChainedRequest>,
}

impl Scope {
    /// `None` when a chain job finds nothing flagged for submission.
    pub async fn resolve(
        kind: InjectionKind,
        prepid: &str,
        repo: &Repo,
    ) -> Result<Option<Scope>, InjectError> {
        match kind {
            InjectionKind::Request => {
                let request: Request = repo.get(prepid).await?;
                Ok(Some(Scope {
                    batch_name: request.campaign().to_string(),
                    task_name: prepid.to_string(),
                    requests: vec![request],
                    chains: Vec::new(),
                }))
            }
            InjectionKind::Chain => Self::resolve_chains(prepid, repo).await,
        }
    }

    async fn resolve_chains(prepid: &str, repo: &Repo) -> Result<Option<Scope>, InjectError> {
        let (chains, campaign_source, task_name) =
            if repo.exists::<ChainedRequest>(prepid).await? {
                let chain: ChainedRequest = repo.get(prepid).await?;
                let current = chain.current_request().map(str::to_string).ok_or_else(|| {
                    InjectError::Validation(format!(
                        "Chain {prepid} has no request at step {}",
                        chain.step()
                    ))
                })?;
                (vec![chain], current.clone(), format!("task_{current}"))
            } else {
                let chains: Vec<ChainedRequest> = repo.query(INDEX_CONTAINS, prepid).await?;
                (chains, prepid.to_string(), format!("task_{prepid}"))
            };

        let source: Request = repo.get(&campaign_source).await?;
        let batch_name = format!("Task_{}", source.campaign());

        let chains: Vec<ChainedRequest> = chains.into_iter().filter(|c| c.is_flagged()).collect();
        if chains.is_empty() {
            return Ok(None);
        }

        // A request shared by several chains is loaded and submitted once.
        let mut seen: HashSet<String> = HashSet::new();
        let mut requests = Vec::new();
        for chain in &chains {
            for member in chain.remaining() {
                if seen.insert(member.clone()) {
                    requests.push(repo.get::<Request>(member).await?);
                }
            }
        }

        Ok(Some(Scope {
            requests,
            batch_name,
            task_name,
            chains,
        }))
    }

    /// Everyone who worked on any of the requests.
    pub fn authors(&self) -> Vec<String> {
        let mut authors: Vec<String> = self
            .requests
            .iter()
            .flat_map(Request::author_emails)
            .collect();
        authors.sort();
        authors.dedup();
        authors
    }

    /// Write the created workflows back and notify authors.
    pub async fn record_success(
        &self,
        kind: InjectionKind,
        batch_id: &str,
        workflows: &[String],
        services: &Services,
    ) -> Result<(), InjectError> {
        let managers: Vec<RequestManager> = workflows
            .iter()
            .map(|wf| RequestManager::new(wf, &self.task_name))
            .collect();

        match kind {
            InjectionKind::Request => {
                let Some(first) = self.requests.first() else {
                    return Ok(());
                };
                let mut request: Request = services.repo.get(first.prepid()).await?;
                request.add_request_managers(managers);
                mark_submitted(&mut request, batch_id)?;
                save(&services.repo, &request).await?;

                let notification = Notification::new(
                    request.author_emails(),
                    format!("Injection succeeded for {}", request.prepid()),
                    request.textified(),
                )
                .accumulate(true);
                services.communicator.send(notification).await;
            }
            InjectionKind::Chain => {
                let mut statuses: HashMap<String, Status> = HashMap::new();
                let mut advanced: Vec<&str> = Vec::new();
                let mut submitted: Vec<String> = Vec::new();
                for chain in &self.chains {
                    let mut message = format!(
                        "Following requests in {} chain were injected:\n\n",
                        chain.prepid()
                    );
                    let mut recipients = Vec::new();
                    let mut last_status = None;
                    for member in chain.remaining() {
                        if let Some(status) = statuses.get(member) {
                            last_status = Some(*status);
                            continue;
                        }
                        let mut request: Request = services.repo.get(member).await?;
                        request.set_request_managers(managers.clone());
                        mark_submitted(&mut request, batch_id)?;
                        if let Err(e) = save(&services.repo, &request).await {
                            report_partial(&advanced, &submitted, chain.prepid());
                            return Err(e);
                        }
                        submitted.push(member.clone());
                        statuses.insert(member.clone(), request.status());

                        message.push_str(&request.textified());
                        message.push_str("\n\n");
                        recipients.extend(request.author_emails());
                        last_status = Some(request.status());
                    }

                    let mut current: ChainedRequest = services.repo.get(chain.prepid()).await?;
                    current.push_history(HistoryEntry::new("inject", batch_id));
                    current.mark_injected(last_status);
                    if !services.repo.update(&current).await? {
                        error!(chain = %chain.prepid(), "could not save chained request");
                        report_partial(&advanced, &submitted, chain.prepid());
                        return Err(InjectError::Persist(format!(
                            "Could not save chained request {}",
                            chain.prepid()
                        )));
                    }

                    let notification = Notification::new(
                        recipients,
                        format!("Injection succeeded for {}", chain.prepid()),
                        message,
                    )
                    .accumulate(true);
                    services.communicator.send(notification).await;
                    advanced.push(chain.prepid());
                }
            }
        }
        Ok(())
    }

    /// Put every request left at submit/approved back to approve/approved.
    pub async fn roll_back(&self, repo: &Repo) {
        for stale in &self.requests {
            let prepid = stale.prepid();
            let mut request: Request = match repo.get(prepid).await {
                Ok(request) => request,
                Err(e) => {
                    error!(prepid, "cannot reload request for rollback: {e}");
                    continue;
                }
            };
            if !request.is_at(Approval::Submit, Status::Approved) {
                info!(
                    prepid,
                    approval = %request.approval(),
                    status = %request.status(),
                    "not resetting request"
                );
                continue;
            }

            info!(prepid, "setting request back to approve/approved");
            request.push_history(HistoryEntry::new(
                "inject",
                "Injection failed (permission denied). Setting to approve/approved",
            ));
            request.set_approval(Approval::Approve);
            match repo.update(&request).await {
                Ok(true) => {}
                Ok(false) => error!(prepid, "rollback lost a revision race"),
                Err(e) => error!(prepid, "rollback failed: {e}"),
            }
        }
    }
}

fn mark_submitted(request: &mut Request, batch_id: &str) -> Result<(), InjectError> {
    if request.status() != Status::Approved {
        return Err(InjectError::Validation(format!(
            "Request {} moved to {} during injection",
            request.prepid(),
            request.status()
        )));
    }
    request.push_history(HistoryEntry::new("inject", batch_id));
    request.set_approval(Approval::Submit);
    request.advance_status()?;
    Ok(())
}

async fn save(repo: &Repo, request: &Request) -> Result<(), InjectError> {
    if repo.update(request).await? {
        Ok(())
    } else {
        error!(prepid = %request.prepid(), "could not update request");
        Err(InjectError::Persist(format!(
            "Could not update request {} in the database",
            request.prepid()
        )))
    }
}

/// Chains and requests already written before a later save failed. They stay
/// submitted; the log line is what an operator reconciles from.
fn report_partial(advanced: &[&str], submitted: &[String], failed_chain: &str) {
    if advanced.is_empty() && submitted.is_empty() {
        return;
    }
    error!(
        failed_chain,
        advanced_chains = ?advanced,
        submitted_requests = ?submitted,
        "injection partially recorded; these were already advanced"
    );
}
