//! Block queue, agent registry and result list.
//!
//! [`CoordinatorState`] is plain data: no sockets, no clocks of its own. Every
//! mutating operation takes the current [`Instant`] so the state machine can
//! be driven deterministically from tests. At runtime it lives behind a single
//! mutex owned by [`Coordinator`], which is what makes "one owner per block"
//! hold across connections.
//!
//! ## Block lifecycle
//!
//! ```text
//! Pending --request_task--> Assigned --complete_block--> Completed
//!    ^                         |
//!    +--- stale / disconnect --+
//! ```
//!
//! Completed blocks are dropped from the table and folded into a contiguous
//! low-water mark, which is what the checkpoint records. A generated id that
//! is no longer in the table is therefore completed.
//!
//! [`Coordinator`]: crate::server::Coordinator

use super::blocks::{BlockPlanner, BlockSizing, block_size};
use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use phrasehunt::{Checkpoint, Eta, FoundResult, IndexRange, RateEstimator, unix_millis};
use phrasehunt_proto::SessionInfo;
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    time::{Duration, Instant},
};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("Agent {agent_id} is not registered")]
    UnknownAgent { agent_id: String },

    #[error("Block {block_id} does not exist or is already completed")]
    UnknownBlock { block_id: u64 },

    #[error("Block {block_id} is not assigned to agent {agent_id}")]
    NotOwner { block_id: u64, agent_id: String },
}

pub type Result<T, E = StateError> = core::result::Result<T, E>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockStatus {
    Pending,
    Assigned,
    Completed,
}

#[derive(Clone, Debug)]
pub struct Block {
    pub id: u64,
    pub range: IndexRange,
    pub status: BlockStatus,
    pub assigned_agent: Option<String>,
    /// Agent that held the block when it was last reclaimed. Only it may
    /// still complete the block while it waits in the queue.
    pub last_owner: Option<String>,
    /// Last assignment or accepted progress report.
    pub last_update: Instant,
    /// First index of the block not yet reported as scanned by the current
    /// owner.
    pub progress: BigUint,
    /// How many times the block has been handed out.
    pub assignments: u32,
}

impl Block {
    fn pending(id: u64, range: IndexRange, now: Instant) -> Self {
        Self {
            id,
            progress: range.start.clone(),
            range,
            status: BlockStatus::Pending,
            assigned_agent: None,
            last_owner: None,
            last_update: now,
            assignments: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentStatus {
    Idle,
    Working,
}

#[derive(Clone, Debug)]
pub struct AgentRecord {
    pub agent_id: String,
    /// Connection that registered this record. A late disconnect from an
    /// older connection must not remove a newer registration.
    pub connection: u64,
    pub endpoint: Option<String>,
    pub threads: Option<usize>,
    pub status: AgentStatus,
    pub current_block: Option<u64>,
    pub connected_at: Instant,
    pub last_seen: Instant,
    /// Rate the agent last reported, indices per second.
    pub reported_rate: f64,
    /// Indices credited to this agent through progress and completions.
    pub scanned: BigUint,
    pub completed_blocks: u64,
    throughput: RateEstimator,
}

impl AgentRecord {
    /// Coordinator-side throughput estimate, falling back to the agent's own
    /// figure until enough samples exist.
    pub fn rate(&self) -> f64 {
        let measured = self.throughput.rate();
        if measured > 0.0 {
            measured
        } else {
            self.reported_rate
        }
    }

    fn credit(&mut self, delta: &BigUint, now: Instant) {
        if delta.is_zero() {
            return;
        }
        self.scanned += delta;
        self.throughput
            .record(now, self.scanned.to_u64().unwrap_or(u64::MAX));
    }
}

/// Result of [`CoordinatorState::request_task`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    Assigned { block_id: u64, range: IndexRange },
    /// Nothing pending right now. `exhausted` is set once the whole space is
    /// completed.
    NoTask { exhausted: bool },
}

/// Result of [`CoordinatorState::complete_block`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Completion {
    Completed { range: IndexRange },
    /// A retransmitted completion for a block already folded in.
    AlreadyCompleted,
}

/// Aggregate view used for progress logs.
#[derive(Clone, Debug)]
pub struct StateSnapshot {
    pub low_water: BigUint,
    pub total: BigUint,
    pub pending: usize,
    pub assigned: usize,
    pub completed_blocks: u64,
    pub agents: usize,
    pub found: usize,
    /// Sum of all agents' throughput.
    pub rate: f64,
    pub eta: Eta,
}

#[derive(Debug)]
pub struct CoordinatorState {
    session: SessionInfo,
    planner: BlockPlanner,
    queue_depth: usize,
    pending: VecDeque<u64>,
    /// Pending and assigned blocks.
    blocks: HashMap<u64, Block>,
    completed_blocks: u64,
    /// Completed ranges above the low-water mark, keyed by start.
    completed_ranges: BTreeMap<BigUint, BigUint>,
    low_water: BigUint,
    agents: HashMap<String, AgentRecord>,
    results: Vec<FoundResult>,
}

impl CoordinatorState {
    /// Plans blocks over `[resume_from, total)`.
    ///
    /// `queue_depth` bounds how many pending blocks are materialized ahead of
    /// demand.
    pub fn new(
        session: SessionInfo,
        sizing: &BlockSizing,
        queue_depth: usize,
        resume_from: BigUint,
    ) -> Self {
        let total = session.total_combinations.clone();
        let start = resume_from.min(total.clone());
        let size = block_size(&total, sizing);
        Self {
            planner: BlockPlanner::new(start.clone(), total, size),
            session,
            queue_depth: queue_depth.max(1),
            pending: VecDeque::new(),
            blocks: HashMap::new(),
            completed_blocks: 0,
            completed_ranges: BTreeMap::new(),
            low_water: start,
            agents: HashMap::new(),
            results: Vec::new(),
        }
    }

    pub fn session(&self) -> &SessionInfo {
        &self.session
    }

    pub fn total(&self) -> &BigUint {
        &self.session.total_combinations
    }

    pub fn block_size(&self) -> &BigUint {
        self.planner.block_size()
    }

    /// Every index below this has been scanned.
    pub fn low_water(&self) -> &BigUint {
        &self.low_water
    }

    pub fn is_finished(&self) -> bool {
        self.low_water >= *self.total()
    }

    pub fn results(&self) -> &[FoundResult] {
        &self.results
    }

    pub fn agent(&self, agent_id: &str) -> Option<&AgentRecord> {
        self.agents.get(agent_id)
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    pub fn block(&self, block_id: u64) -> Option<&Block> {
        self.blocks.get(&block_id)
    }

    pub fn block_status(&self, block_id: u64) -> Option<BlockStatus> {
        match self.blocks.get(&block_id) {
            Some(block) => Some(block.status),
            None if self.planner.issued(block_id) => Some(BlockStatus::Completed),
            None => None,
        }
    }

    /// Pending block ids in dispatch order.
    pub fn pending_ids(&self) -> Vec<u64> {
        self.pending.iter().copied().collect()
    }

    /// Registers (or re-registers) an agent. Returns `true` when a record
    /// for this id already existed.
    pub fn register_agent(
        &mut self,
        agent_id: &str,
        connection: u64,
        endpoint: Option<String>,
        threads: Option<usize>,
        now: Instant,
    ) -> bool {
        let previous = self.agents.insert(
            agent_id.to_string(),
            AgentRecord {
                agent_id: agent_id.to_string(),
                connection,
                endpoint,
                threads,
                status: AgentStatus::Idle,
                current_block: None,
                connected_at: now,
                last_seen: now,
                reported_rate: 0.0,
                scanned: BigUint::zero(),
                completed_blocks: 0,
                throughput: RateEstimator::new(),
            },
        );
        let Some(previous) = previous else {
            return false;
        };
        // Blocks still held under this id stay with it.
        if let Some(record) = self.agents.get_mut(agent_id) {
            record.current_block = previous.current_block;
            record.completed_blocks = previous.completed_blocks;
            record.scanned = previous.scanned;
            if record.current_block.is_some() {
                record.status = AgentStatus::Working;
            }
        }
        true
    }

    /// Hands the head of the pending queue to `agent_id`.
    pub fn request_task(&mut self, agent_id: &str, now: Instant) -> Result<TaskOutcome> {
        self.touch(agent_id, now)?;
        self.refill(now);

        while let Some(block_id) = self.pending.pop_front() {
            let Some(block) = self.blocks.get_mut(&block_id) else {
                continue;
            };
            block.status = BlockStatus::Assigned;
            block.assigned_agent = Some(agent_id.to_string());
            block.last_owner = None;
            block.last_update = now;
            block.progress = block.range.start.clone();
            block.assignments += 1;
            let range = block.range.clone();

            if let Some(agent) = self.agents.get_mut(agent_id) {
                agent.current_block = Some(block_id);
                agent.status = AgentStatus::Working;
            }
            return Ok(TaskOutcome::Assigned { block_id, range });
        }

        Ok(TaskOutcome::NoTask {
            exhausted: self.is_finished(),
        })
    }

    /// Confirms the agent started on its block.
    pub fn accept_task(&mut self, agent_id: &str, block_id: u64, now: Instant) -> Result<()> {
        self.touch(agent_id, now)?;
        let block = self.owned_block_mut(agent_id, block_id)?;
        block.last_update = now;
        Ok(())
    }

    /// Records that the owner has scanned `[start, current_index)`.
    ///
    /// Only the assigned agent may report. Indices are clamped to the block
    /// and never move backwards.
    pub fn report_progress(
        &mut self,
        agent_id: &str,
        block_id: u64,
        current_index: &BigUint,
        rate: f64,
        now: Instant,
    ) -> Result<()> {
        self.touch(agent_id, now)?;
        self.advance_block(agent_id, block_id, current_index, now)?;
        if let Some(agent) = self.agents.get_mut(agent_id) {
            if rate.is_finite() && rate >= 0.0 {
                agent.reported_rate = rate;
            }
        }
        Ok(())
    }

    /// Liveness ping. A block position, when present and owned, counts as
    /// progress; anything else about the block is ignored.
    pub fn heartbeat(
        &mut self,
        agent_id: &str,
        block_id: Option<u64>,
        current_index: Option<&BigUint>,
        now: Instant,
    ) -> Result<()> {
        self.touch(agent_id, now)?;
        if let (Some(block_id), Some(current)) = (block_id, current_index) {
            let _ = self.advance_block(agent_id, block_id, current, now);
        }
        Ok(())
    }

    /// Appends a match. Results are never dropped, whoever reports them.
    pub fn record_found(&mut self, block_id: u64, mut result: FoundResult) -> FoundResult {
        result.block_id = Some(block_id);
        self.results.push(result.clone());
        result
    }

    /// Marks a block completed and advances the low-water mark.
    ///
    /// The current owner may always complete its block. A block reclaimed
    /// from an agent but not yet handed out again may still be completed by
    /// that agent. Every other completion is rejected with
    /// [`StateError::NotOwner`].
    pub fn complete_block(
        &mut self,
        agent_id: &str,
        block_id: u64,
        now: Instant,
    ) -> Result<Completion> {
        if !self.blocks.contains_key(&block_id) && self.planner.issued(block_id) {
            return Ok(Completion::AlreadyCompleted);
        }
        self.touch(agent_id, now)?;

        let block = self
            .blocks
            .get(&block_id)
            .ok_or(StateError::UnknownBlock { block_id })?;
        let owned = match block.status {
            BlockStatus::Assigned => block.assigned_agent.as_deref() == Some(agent_id),
            BlockStatus::Pending => block.last_owner.as_deref() == Some(agent_id),
            BlockStatus::Completed => false,
        };
        if !owned {
            return Err(StateError::NotOwner {
                block_id,
                agent_id: agent_id.to_string(),
            });
        }
        if block.status == BlockStatus::Pending {
            self.pending.retain(|id| *id != block_id);
        }

        let Some(block) = self.blocks.remove(&block_id) else {
            return Err(StateError::UnknownBlock { block_id });
        };
        let remaining = if block.progress < block.range.end {
            &block.range.end - &block.progress
        } else {
            BigUint::zero()
        };

        self.completed_blocks += 1;
        self.completed_ranges
            .insert(block.range.start.clone(), block.range.end.clone());
        self.fold_completed();

        if let Some(agent) = self.agents.get_mut(agent_id) {
            agent.credit(&remaining, now);
            agent.completed_blocks += 1;
            if agent.current_block == Some(block_id) {
                agent.current_block = None;
                agent.status = AgentStatus::Idle;
            }
        }
        Ok(Completion::Completed { range: block.range })
    }

    /// Reverts every assigned block without an update for longer than
    /// `timeout`. Returns the reclaimed ids.
    pub fn sweep_stale_blocks(&mut self, timeout: Duration, now: Instant) -> Vec<u64> {
        let mut stale: Vec<u64> = self
            .blocks
            .values()
            .filter(|b| {
                b.status == BlockStatus::Assigned
                    && now.saturating_duration_since(b.last_update) > timeout
            })
            .map(|b| b.id)
            .collect();
        stale.sort_unstable();
        for block_id in &stale {
            self.requeue(*block_id);
        }
        stale
    }

    /// Removes agents not heard from for longer than `timeout`, reverting
    /// their blocks. Returns the removed ids with the blocks each one held.
    pub fn sweep_silent_agents(
        &mut self,
        timeout: Duration,
        now: Instant,
    ) -> Vec<(String, Vec<u64>)> {
        let mut silent: Vec<(String, u64)> = self
            .agents
            .values()
            .filter(|a| now.saturating_duration_since(a.last_seen) > timeout)
            .map(|a| (a.agent_id.clone(), a.connection))
            .collect();
        silent.sort_unstable();
        silent
            .into_iter()
            .filter_map(|(agent_id, connection)| {
                let blocks = self.disconnect_agent(&agent_id, connection)?;
                Some((agent_id, blocks))
            })
            .collect()
    }

    /// Drops the agent registered by `connection` and reverts its blocks.
    ///
    /// Returns `None` when the id is unknown or now belongs to another
    /// connection.
    pub fn disconnect_agent(&mut self, agent_id: &str, connection: u64) -> Option<Vec<u64>> {
        if self.agents.get(agent_id)?.connection != connection {
            return None;
        }
        self.agents.remove(agent_id);

        let mut held: Vec<u64> = self
            .blocks
            .values()
            .filter(|b| {
                b.status == BlockStatus::Assigned && b.assigned_agent.as_deref() == Some(agent_id)
            })
            .map(|b| b.id)
            .collect();
        held.sort_unstable();
        for block_id in &held {
            self.requeue(*block_id);
        }
        Some(held)
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let assigned = self
            .blocks
            .values()
            .filter(|b| b.status == BlockStatus::Assigned)
            .count();
        let rate: f64 = self.agents.values().map(AgentRecord::rate).sum();
        let remaining = if self.is_finished() {
            BigUint::zero()
        } else {
            self.total() - &self.low_water
        };
        StateSnapshot {
            low_water: self.low_water.clone(),
            total: self.total().clone(),
            pending: self.pending.len(),
            assigned,
            completed_blocks: self.completed_blocks,
            agents: self.agents.len(),
            found: self.results.len(),
            rate,
            eta: if remaining.is_zero() {
                Eta::Remaining(Duration::ZERO)
            } else {
                Eta::from_rate(&remaining, rate)
            },
        }
    }

    /// Checkpoint recording the low-water mark.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            seed_pattern: self.session.seed_pattern.clone().unwrap_or_default(),
            target_address: self.session.target_address.clone(),
            word_count: self.session.word_count,
            full_search: self.session.full_search,
            thread_count: self.agents.values().filter_map(|a| a.threads).sum(),
            timestamp: unix_millis(),
            current_index: self.low_water.clone(),
            total_index: self.total().clone(),
            last_checked_phrase: None,
            remaining_ranges: Vec::new(),
        }
    }

    fn touch(&mut self, agent_id: &str, now: Instant) -> Result<()> {
        let agent = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| StateError::UnknownAgent {
                agent_id: agent_id.to_string(),
            })?;
        agent.last_seen = now;
        Ok(())
    }

    fn owned_block_mut(&mut self, agent_id: &str, block_id: u64) -> Result<&mut Block> {
        let block = self
            .blocks
            .get_mut(&block_id)
            .ok_or(StateError::UnknownBlock { block_id })?;
        if block.status != BlockStatus::Assigned || block.assigned_agent.as_deref() != Some(agent_id)
        {
            return Err(StateError::NotOwner {
                block_id,
                agent_id: agent_id.to_string(),
            });
        }
        Ok(block)
    }

    fn advance_block(
        &mut self,
        agent_id: &str,
        block_id: u64,
        current: &BigUint,
        now: Instant,
    ) -> Result<()> {
        let block = self.owned_block_mut(agent_id, block_id)?;
        block.last_update = now;
        let current = current
            .clone()
            .min(block.range.end.clone())
            .max(block.range.start.clone());
        if current <= block.progress {
            return Ok(());
        }
        let delta = &current - &block.progress;
        block.progress = current;

        if let Some(agent) = self.agents.get_mut(agent_id) {
            agent.credit(&delta, now);
        }
        Ok(())
    }

    /// Materializes blocks until the pending window is full.
    fn refill(&mut self, now: Instant) {
        while self.pending.len() < self.queue_depth {
            let Some((block_id, range)) = self.planner.next_block() else {
                break;
            };
            self.blocks
                .insert(block_id, Block::pending(block_id, range, now));
            self.pending.push_back(block_id);
        }
    }

    fn requeue(&mut self, block_id: u64) {
        let Some(block) = self.blocks.get_mut(&block_id) else {
            return;
        };
        if block.status != BlockStatus::Assigned {
            return;
        }
        block.status = BlockStatus::Pending;
        block.progress = block.range.start.clone();
        let owner = block.assigned_agent.take();
        block.last_owner.clone_from(&owner);
        self.pending.push_back(block_id);

        if let Some(agent) = owner.as_deref().and_then(|id| self.agents.get_mut(id)) {
            if agent.current_block == Some(block_id) {
                agent.current_block = None;
                agent.status = AgentStatus::Idle;
            }
        }
    }

    fn fold_completed(&mut self) {
        while let Some(end) = self.completed_ranges.remove(&self.low_water) {
            self.low_water = end;
        }
    }
}
