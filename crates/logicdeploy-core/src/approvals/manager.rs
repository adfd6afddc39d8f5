//! Approval round bookkeeping across releases.
//!
//! `ApprovalManager` owns the live round of every release, indexes slots by
//! id, appends to the audit trail and persists each round after it changes.
//! Callers serialize mutations per release (see `orchestrator::locks`).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use logicdeploy_state::{PipelineRecord, PipelineStore, RecordKind};
use tracing::{info, warn};

use super::audit::{AuditAction, AuditEntry, AuditTrail};
use super::engine;
use super::error::{ApprovalError, ApprovalResult};
use super::policy::ApprovalPolicy;
use super::slot::{ApprovalDecision, ApprovalRound, Approver, DeployApproval, RoundStatus};
use crate::metrics::METRICS;
use crate::obs;

#[derive(Default)]
struct Rounds {
    by_release: HashMap<String, ApprovalRound>,
    /// approval id -> (release id, round id)
    slots: HashMap<String, (String, String)>,
    audit: AuditTrail,
    /// Highest audit sequence number known to be in the store.
    stored_seq: u64,
}

impl Rounds {
    fn index(&mut self, round: &ApprovalRound) {
        for slot in &round.slots {
            self.slots.insert(
                slot.id.clone(),
                (round.release_id.clone(), round.round_id.clone()),
            );
        }
    }
}

pub struct ApprovalManager {
    policy: ApprovalPolicy,
    store: Arc<dyn PipelineStore>,
    inner: Mutex<Rounds>,
}

impl ApprovalManager {
    pub fn new(policy: ApprovalPolicy, store: Arc<dyn PipelineStore>) -> Self {
        Self {
            policy,
            store,
            inner: Mutex::new(Rounds::default()),
        }
    }

    pub fn policy(&self) -> &ApprovalPolicy {
        &self.policy
    }

    fn lock(&self) -> MutexGuard<'_, Rounds> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn persist(&self, round: &ApprovalRound) -> ApprovalResult<()> {
        let record = PipelineRecord::encode(
            RecordKind::ApprovalRound,
            round.round_id.clone(),
            round.release_id.clone(),
            round,
        )?;
        self.store.put(record).await?;
        self.persist_audit().await
    }

    /// Store audit entries appended since the last write. Entries are keyed
    /// by sequence number, so a repeated write is harmless.
    async fn persist_audit(&self) -> ApprovalResult<()> {
        let pending: Vec<AuditEntry> = {
            let inner = self.lock();
            inner
                .audit
                .entries()
                .iter()
                .filter(|e| e.seq > inner.stored_seq)
                .cloned()
                .collect()
        };
        let Some(last) = pending.last().map(|e| e.seq) else {
            return Ok(());
        };
        for entry in &pending {
            let record = PipelineRecord::encode(
                RecordKind::AuditEntry,
                format!("{:012}", entry.seq),
                entry.release_id.clone(),
                entry,
            )?;
            self.store.put(record).await?;
        }
        let mut inner = self.lock();
        inner.stored_seq = inner.stored_seq.max(last);
        Ok(())
    }

    /// Open a fresh round for `release_id`, superseding any previous one.
    pub async fn request_approvals(
        &self,
        release_id: &str,
        warnings: usize,
        now: DateTime<Utc>,
    ) -> ApprovalResult<ApprovalRound> {
        let round = engine::open_round(release_id, &self.policy, warnings, now);
        let superseded = {
            let mut inner = self.lock();
            let previous = inner.by_release.remove(release_id).map(|mut old| {
                if !old.status.is_closed() {
                    old.status = RoundStatus::Superseded;
                }
                old
            });
            if let Some(old) = &previous {
                inner.audit.append(
                    release_id,
                    &old.round_id,
                    "system",
                    AuditAction::Superseded {
                        by_round: round.round_id.clone(),
                    },
                    None,
                    now,
                );
            }
            inner.audit.append(
                release_id,
                &round.round_id,
                "system",
                AuditAction::RoundOpened {
                    slots: round.slots.len(),
                },
                None,
                now,
            );
            inner.index(&round);
            inner.by_release.insert(release_id.to_string(), round.clone());
            previous
        };

        if let Some(old) = &superseded {
            self.persist(old).await?;
        }
        self.persist(&round).await?;
        info!(
            release_id = %release_id,
            round_id = %round.round_id,
            slots = round.slots.len(),
            warnings = warnings,
            "approval round opened"
        );
        Ok(round)
    }

    /// Record one approver's decision.
    ///
    /// # Errors
    ///
    /// Returns `ApprovalError::NotFound` if the id is unknown.
    /// Returns `ApprovalError::RoundClosed` if the slot belongs to a superseded round.
    /// Otherwise propagates the rejection from [`engine::submit_decision`].
    pub async fn submit_approval(
        &self,
        approval_id: &str,
        approver: &Approver,
        decision: ApprovalDecision,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> ApprovalResult<DeployApproval> {
        let (outcome, round) = {
            let mut inner = self.lock();
            let (release_id, round_id) =
                inner
                    .slots
                    .get(approval_id)
                    .cloned()
                    .ok_or_else(|| ApprovalError::NotFound {
                        approval_id: approval_id.to_string(),
                    })?;
            let Rounds {
                by_release, audit, ..
            } = &mut *inner;
            let round = by_release
                .get_mut(&release_id)
                .filter(|r| r.round_id == round_id)
                .ok_or_else(|| ApprovalError::RoundClosed {
                    round_id: round_id.clone(),
                    status: RoundStatus::Superseded,
                })?;

            let outcome = engine::submit_decision(
                round,
                approval_id,
                approver,
                decision,
                comment.clone(),
                now,
            );
            match outcome {
                Ok(_) => {
                    audit.append(
                        &release_id,
                        &round_id,
                        &approver.id,
                        AuditAction::Decision {
                            approval_id: approval_id.to_string(),
                            decision: decision.as_str().to_string(),
                        },
                        comment,
                        now,
                    );
                }
                Err(ApprovalError::TimedOut { .. }) => {
                    audit.append(&release_id, &round_id, "system", AuditAction::TimedOut, None, now);
                }
                Err(err) => return Err(err),
            }
            (outcome, round.clone())
        };

        self.persist(&round).await?;
        match &outcome {
            Ok(slot) => {
                METRICS.inc_approvals_decided();
                obs::emit_approval_decided(
                    &round.release_id,
                    &slot.id,
                    &approver.id,
                    decision.as_str(),
                    round.status,
                );
            }
            Err(err) => warn!(release_id = %round.release_id, error = %err, "approval rejected"),
        }
        outcome
    }

    /// Force-approve every pending slot of the release's round.
    pub async fn emergency_bypass(
        &self,
        release_id: &str,
        approver: &Approver,
        justification: &str,
        now: DateTime<Utc>,
    ) -> ApprovalResult<usize> {
        let (forced, round) = {
            let mut inner = self.lock();
            let Rounds {
                by_release, audit, ..
            } = &mut *inner;
            let round = by_release
                .get_mut(release_id)
                .ok_or_else(|| ApprovalError::NoRound {
                    release_id: release_id.to_string(),
                })?;
            let forced = engine::bypass(round, &self.policy, approver, justification, now)?;
            audit.append(
                release_id,
                &round.round_id,
                &approver.id,
                AuditAction::Bypass {
                    justification: justification.trim().to_string(),
                    forced,
                },
                None,
                now,
            );
            (forced, round.clone())
        };

        self.persist(&round).await?;
        warn!(
            event = "approval.bypass",
            release_id = %release_id,
            approver = %approver.id,
            role = %approver.role,
            forced = forced,
            "emergency bypass recorded"
        );
        Ok(forced)
    }

    /// Quorum met and nothing rejected on the live round.
    pub fn all_approved(&self, release_id: &str) -> bool {
        self.lock()
            .by_release
            .get(release_id)
            .is_some_and(ApprovalRound::all_approved)
    }

    pub fn round(&self, release_id: &str) -> Option<ApprovalRound> {
        self.lock().by_release.get(release_id).cloned()
    }

    pub fn release_of(&self, approval_id: &str) -> Option<String> {
        self.lock().slots.get(approval_id).map(|(r, _)| r.clone())
    }

    /// Time out the release's round if it is past due and return its status.
    pub async fn refresh(&self, release_id: &str, now: DateTime<Utc>) -> ApprovalResult<RoundStatus> {
        let expired = {
            let mut inner = self.lock();
            let Rounds {
                by_release, audit, ..
            } = &mut *inner;
            let round = by_release
                .get_mut(release_id)
                .ok_or_else(|| ApprovalError::NoRound {
                    release_id: release_id.to_string(),
                })?;
            if engine::expire_round(round, now) {
                audit.append(release_id, &round.round_id, "system", AuditAction::TimedOut, None, now);
                Some(round.clone())
            } else {
                return Ok(round.status);
            }
        };
        if let Some(round) = &expired {
            self.persist(round).await?;
            warn!(release_id = %release_id, round_id = %round.round_id, "approval round timed out");
        }
        Ok(RoundStatus::TimedOut)
    }

    /// Time out every open round past due. Returns the affected releases.
    pub async fn expire_due(&self, now: DateTime<Utc>) -> ApprovalResult<Vec<String>> {
        let releases: Vec<String> = self.lock().by_release.keys().cloned().collect();
        let mut expired = Vec::new();
        for release_id in releases {
            let open = self
                .round(&release_id)
                .is_some_and(|r| r.status == RoundStatus::Open && r.is_expired_at(now));
            if open && self.refresh(&release_id, now).await? == RoundStatus::TimedOut {
                expired.push(release_id);
            }
        }
        expired.sort();
        Ok(expired)
    }

    /// Reload live rounds and the audit trail from the store.
    ///
    /// # Errors
    ///
    /// Returns `ApprovalError::Audit` if the stored trail fails verification.
    pub async fn load(&self) -> ApprovalResult<usize> {
        let records = self.store.list(RecordKind::ApprovalRound, None).await?;
        let mut rounds = Vec::with_capacity(records.len());
        for record in records {
            rounds.push(record.decode::<ApprovalRound>()?);
        }

        let records = self.store.list(RecordKind::AuditEntry, None).await?;
        let mut entries = Vec::with_capacity(records.len());
        for record in records {
            entries.push(record.decode::<AuditEntry>()?);
        }
        let trail = AuditTrail::from_entries(entries);
        trail
            .verify()
            .map_err(|seq| ApprovalError::Audit(format!("stored trail broken at entry {seq}")))?;
        {
            let mut inner = self.lock();
            if trail.len() >= inner.audit.len() {
                inner.stored_seq = trail.entries().last().map_or(0, |e| e.seq);
                inner.audit = trail;
            }
        }

        Ok(self.restore(rounds))
    }

    /// Install rounds recovered from storage; superseded rounds are skipped
    /// and the newest round per release wins.
    pub fn restore(&self, rounds: Vec<ApprovalRound>) -> usize {
        let mut inner = self.lock();
        let mut installed = 0;
        for round in rounds {
            if round.status == RoundStatus::Superseded {
                continue;
            }
            let newer = inner
                .by_release
                .get(&round.release_id)
                .is_some_and(|existing| existing.opened_at > round.opened_at);
            if newer {
                continue;
            }
            inner.index(&round);
            inner.by_release.insert(round.release_id.clone(), round);
            installed += 1;
        }
        installed
    }

    pub fn audit(&self) -> AuditTrail {
        self.lock().audit.clone()
    }
}
