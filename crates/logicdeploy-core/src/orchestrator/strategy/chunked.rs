//! Chunked rollout: one chunk per logic file, applied level by level.
//!
//! The plan is computed before any target is touched, so a dependency cycle
//! fails the rollout with nothing changed. Chunks whose content already
//! matches the target are skipped, which makes a resumed rollout pick up
//! where it stopped.

use async_trait::async_trait;
use futures::future::join_all;
use logicdeploy_state::{ChunkPayload, ContentDigest};

use super::{percent, Rollout, RolloutError, RolloutStrategy};
use crate::domain::{LogLevel, PipelineError, StrategyKind};
use crate::orchestrator::calls::CallOutcome;
use crate::orchestrator::plan::{plan_chunks, ChunkPlan};

pub struct ChunkedRollout;

fn payloads(rollout: &Rollout<'_>, level: &[String]) -> Result<Vec<ChunkPayload>, PipelineError> {
    level
        .iter()
        .map(|path| {
            let file = rollout.snapshot.file(path).ok_or_else(|| {
                PipelineError::InvalidPlan(format!("chunk {path} is not in the snapshot"))
            })?;
            Ok(ChunkPayload {
                chunk_id: path.clone(),
                snapshot_id: rollout.snapshot.snapshot_id.clone(),
                digest: ContentDigest::from_bytes(file.content.as_bytes()),
                content: file.content.clone(),
            })
        })
        .collect()
}

async fn apply_level(
    rollout: &Rollout<'_>,
    target: &str,
    chunks: &[ChunkPayload],
) -> Result<usize, RolloutError> {
    let calls = rollout.calls();
    let remote = calls
        .query_state(target)
        .await
        .map_err(PipelineError::Runtime)?;
    let pending: Vec<&ChunkPayload> = chunks
        .iter()
        .filter(|c| remote.chunks.get(&c.chunk_id) != Some(&c.digest))
        .collect();
    let skipped = chunks.len() - pending.len();
    if skipped > 0 {
        rollout
            .observer
            .log(
                LogLevel::Info,
                Some(target),
                &format!("{skipped} chunk(s) already applied"),
            )
            .await;
    }

    let results = join_all(pending.iter().map(|chunk| {
        let digest = chunk.digest.clone();
        let id = chunk.chunk_id.clone();
        calls.mutate(
            target,
            "apply_chunk",
            rollout.runtime.apply_chunk(target, chunk),
            move |s| s.chunks.get(&id) == Some(&digest),
        )
    }))
    .await;

    for (chunk, result) in pending.iter().zip(results) {
        let outcome = result?;
        let suffix = if outcome == CallOutcome::ConfirmedAfterTimeout {
            " (confirmed after timeout)"
        } else {
            ""
        };
        rollout
            .observer
            .log(
                LogLevel::Info,
                Some(target),
                &format!("applied chunk {} {}{suffix}", chunk.chunk_id, chunk.digest.short()),
            )
            .await;
    }
    Ok(chunks.len())
}

#[async_trait]
impl RolloutStrategy for ChunkedRollout {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Chunked
    }

    async fn execute(&self, rollout: &Rollout<'_>) -> Result<(), RolloutError> {
        let plan: ChunkPlan = plan_chunks(rollout.facts)?;
        let levels = plan
            .levels
            .iter()
            .map(|level| payloads(rollout, level))
            .collect::<Result<Vec<_>, _>>()?;
        rollout
            .observer
            .log(
                LogLevel::Info,
                None,
                &format!(
                    "planned {} chunk(s) in {} level(s)",
                    plan.chunk_count(),
                    plan.levels.len()
                ),
            )
            .await;

        let total = plan.chunk_count() * rollout.targets.len();
        let mut done = 0;
        for target in rollout.targets {
            for chunks in &levels {
                rollout.observer.boundary().await?;
                done += apply_level(rollout, target, chunks).await?;
                rollout.observer.progress(percent(done, total)).await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::orchestrator::clock::SystemClock;
    use chrono::Utc;
    use logicdeploy_state::{LogicFile, Snapshot, VendorDialect};

    #[tokio::test]
    async fn test_levels_applied_in_order() {
        let rt = runtime(&["plc-1"]);
        let snap = snapshot();
        let facts = logicdeploy_safety::extract(&snap);
        let cfg = config();
        let observer = RecordingObserver::default();
        let ids = targets(&["plc-1"]);
        let rollout = Rollout {
            deployment_id: "dep-1",
            snapshot: &snap,
            facts: &facts,
            targets: &ids,
            runtime: &rt,
            config: &cfg,
            clock: &SystemClock,
            observer: &observer,
        };

        ChunkedRollout.execute(&rollout).await.unwrap();

        let lines = observer.lines.lock().unwrap();
        let pos = |path: &str| {
            lines
                .iter()
                .position(|(_, _, m)| m.starts_with(&format!("applied chunk {path}")))
                .unwrap()
        };
        assert!(pos("types.st") < pos("mixer.st"));
        assert!(pos("mixer.st") < pos("main.st"));
        drop(lines);

        let state = rt.state("plc-1").unwrap();
        assert_eq!(state.chunks.len(), 3);
        assert_eq!(observer.last_percent(), Some(100));
    }

    #[tokio::test]
    async fn test_resume_skips_applied_chunks() {
        let rt = runtime(&["plc-1"]);
        let snap = snapshot();
        let facts = logicdeploy_safety::extract(&snap);
        let cfg = config();
        let observer = RecordingObserver::default();
        let ids = targets(&["plc-1"]);
        let rollout = Rollout {
            deployment_id: "dep-1",
            snapshot: &snap,
            facts: &facts,
            targets: &ids,
            runtime: &rt,
            config: &cfg,
            clock: &SystemClock,
            observer: &observer,
        };

        ChunkedRollout.execute(&rollout).await.unwrap();
        ChunkedRollout.execute(&rollout).await.unwrap();
        assert_eq!(rt.call_count("apply_chunk"), 3);
        assert!(observer.contains("1 chunk(s) already applied"));
    }

    #[tokio::test]
    async fn test_cycle_fails_before_any_mutation() {
        let rt = runtime(&["plc-1"]);
        let now = Utc::now();
        let snap = Snapshot::new(
            "snap-c",
            "v-c",
            vec![
                LogicFile::new(
                    "a.st",
                    VendorDialect::Iec61131,
                    "FUNCTION_BLOCK FbA\nVAR b : FbB; END_VAR\nEND_FUNCTION_BLOCK",
                    now,
                ),
                LogicFile::new(
                    "b.st",
                    VendorDialect::Iec61131,
                    "FUNCTION_BLOCK FbB\nVAR a : FbA; END_VAR\nEND_FUNCTION_BLOCK",
                    now,
                ),
            ],
        );
        let facts = logicdeploy_safety::extract(&snap);
        let cfg = config();
        let observer = RecordingObserver::default();
        let ids = targets(&["plc-1"]);
        let rollout = Rollout {
            deployment_id: "dep-1",
            snapshot: &snap,
            facts: &facts,
            targets: &ids,
            runtime: &rt,
            config: &cfg,
            clock: &SystemClock,
            observer: &observer,
        };

        let err = ChunkedRollout.execute(&rollout).await.unwrap_err();
        assert!(matches!(err, RolloutError::Failed(PipelineError::InvalidPlan(_))));
        assert!(rt.calls().is_empty());
    }
}
