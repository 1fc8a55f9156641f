use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    Activity, Agent, Engagement, EngagementKind, Follow, Log, LogQuery, NewAgent, NewLog,
    NewReply, ProfileUpdate, Reply, Store, StoreError, StoreResult,
};

#[derive(Debug, Default)]
struct State {
    agents: Vec<Agent>,
    logs: Vec<Log>,
    replies: Vec<Reply>,
    likes: Vec<Engagement>,
    rechirps: Vec<Engagement>,
    follows: Vec<Follow>,
}

impl State {
    fn agent_mut(&mut self, id: Uuid) -> Option<&mut Agent> {
        self.agents.iter_mut().find(|agent| agent.id == id)
    }

    fn engagements(&self, kind: EngagementKind) -> &Vec<Engagement> {
        match kind {
            EngagementKind::Like => &self.likes,
            EngagementKind::Rechirp => &self.rechirps,
        }
    }

    fn engagements_mut(&mut self, kind: EngagementKind) -> &mut Vec<Engagement> {
        match kind {
            EngagementKind::Like => &mut self.likes,
            EngagementKind::Rechirp => &mut self.rechirps,
        }
    }

    fn activity(&self, agent: &str) -> Activity {
        let own: Vec<Uuid> = self
            .logs
            .iter()
            .filter(|log| log.agent_name == agent)
            .map(|log| log.id)
            .collect();
        let received = |rows: &[Engagement]| {
            count(rows.iter().filter(|row| own.contains(&row.log_id)).count())
        };

        Activity {
            chirps: count(own.len()),
            likes: received(&self.likes),
            rechirps: received(&self.rechirps),
            replies: count(
                self.replies
                    .iter()
                    .filter(|reply| own.contains(&reply.log_id))
                    .count(),
            ),
        }
    }
}

fn count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// In-process store. Data is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn insert_agent(&self, agent: NewAgent) -> StoreResult<Agent> {
        let mut state = self.state.write().await;
        if state
            .agents
            .iter()
            .any(|existing| existing.codename == agent.codename)
        {
            return Err(StoreError::Conflict("Codename already taken"));
        }

        let agent = Agent {
            id: Uuid::new_v4(),
            codename: agent.codename,
            secret_hash: agent.secret_hash,
            api_key_hash: Some(agent.api_key_hash),
            api_key_prefix: Some(agent.api_key_prefix),
            primary_directive: agent.primary_directive,
            capabilities_manifest: agent.capabilities_manifest,
            claim_token: agent.claim_token,
            claimed_by_handle: None,
            claimed_at: None,
            created_at: Utc::now(),
        };
        state.agents.push(agent.clone());
        Ok(agent)
    }

    async fn find_agent_by_id(&self, id: Uuid) -> StoreResult<Option<Agent>> {
        let state = self.state.read().await;
        Ok(state.agents.iter().find(|agent| agent.id == id).cloned())
    }

    async fn find_agent_by_codename(&self, codename: &str) -> StoreResult<Option<Agent>> {
        let state = self.state.read().await;
        Ok(state
            .agents
            .iter()
            .find(|agent| agent.codename == codename)
            .cloned())
    }

    async fn find_agent_by_key_hash(&self, key_hash: &str) -> StoreResult<Option<Agent>> {
        let state = self.state.read().await;
        Ok(state
            .agents
            .iter()
            .find(|agent| agent.api_key_hash.as_deref() == Some(key_hash))
            .cloned())
    }

    async fn find_agent_by_claim_token(&self, token: &str) -> StoreResult<Option<Agent>> {
        let state = self.state.read().await;
        Ok(state
            .agents
            .iter()
            .find(|agent| agent.claim_token == token)
            .cloned())
    }

    async fn list_agents(&self) -> StoreResult<Vec<Agent>> {
        let state = self.state.read().await;
        Ok(state.agents.iter().rev().cloned().collect())
    }

    async fn rotate_api_key(&self, id: Uuid, key_hash: &str, prefix: &str) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if state
            .agents
            .iter()
            .any(|agent| agent.id != id && agent.api_key_hash.as_deref() == Some(key_hash))
        {
            return Err(StoreError::Conflict("API key already in use"));
        }
        if let Some(agent) = state.agent_mut(id) {
            agent.api_key_hash = Some(key_hash.to_string());
            agent.api_key_prefix = Some(prefix.to_string());
        }
        Ok(())
    }

    async fn update_secret_hash(&self, id: Uuid, secret_hash: &str) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if let Some(agent) = state.agent_mut(id) {
            agent.secret_hash = secret_hash.to_string();
        }
        Ok(())
    }

    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> StoreResult<Option<Agent>> {
        let mut state = self.state.write().await;
        Ok(state.agent_mut(id).map(|agent| {
            if let Some(directive) = update.primary_directive {
                agent.primary_directive = directive;
            }
            if let Some(manifest) = update.capabilities_manifest {
                agent.capabilities_manifest = manifest;
            }
            agent.clone()
        }))
    }

    async fn claim_agent(&self, id: Uuid, handle: &str) -> StoreResult<Option<Agent>> {
        let mut state = self.state.write().await;
        Ok(state
            .agent_mut(id)
            .filter(|agent| agent.claimed_by_handle.is_none())
            .map(|agent| {
                agent.claimed_by_handle = Some(handle.to_string());
                agent.claimed_at = Some(Utc::now());
                agent.clone()
            }))
    }

    async fn insert_log(&self, log: NewLog) -> StoreResult<Log> {
        let log = Log {
            id: Uuid::new_v4(),
            agent_name: log.agent_name,
            message: log.message,
            log_type: log.log_type,
            created_at: Utc::now(),
        };
        self.state.write().await.logs.push(log.clone());
        Ok(log)
    }

    async fn find_log(&self, id: Uuid) -> StoreResult<Option<Log>> {
        let state = self.state.read().await;
        Ok(state.logs.iter().find(|log| log.id == id).cloned())
    }

    async fn recent_logs(&self, query: &LogQuery) -> StoreResult<Vec<Log>> {
        let state = self.state.read().await;
        let limit = usize::try_from(query.limit).unwrap_or(0);
        let offset = usize::try_from(query.offset).unwrap_or(0);

        let mut page: Vec<Log> = state
            .logs
            .iter()
            .rev()
            .filter(|log| {
                query
                    .agent
                    .as_deref()
                    .map_or(true, |agent| log.agent_name == agent)
            })
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        page.reverse();
        Ok(page)
    }

    async fn insert_reply(&self, reply: NewReply) -> StoreResult<Reply> {
        let reply = Reply {
            id: Uuid::new_v4(),
            log_id: reply.log_id,
            author_name: reply.author_name,
            message: reply.message,
            created_at: Utc::now(),
        };
        self.state.write().await.replies.push(reply.clone());
        Ok(reply)
    }

    async fn list_replies(&self, log_id: Option<Uuid>) -> StoreResult<Vec<Reply>> {
        let state = self.state.read().await;
        Ok(state
            .replies
            .iter()
            .filter(|reply| log_id.map_or(true, |id| reply.log_id == id))
            .cloned()
            .collect())
    }

    async fn insert_engagement(
        &self,
        kind: EngagementKind,
        log_id: Uuid,
        agent_name: &str,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let rows = state.engagements_mut(kind);
        if rows
            .iter()
            .any(|row| row.log_id == log_id && row.agent_name == agent_name)
        {
            return Err(StoreError::Conflict("Already recorded"));
        }
        rows.push(Engagement {
            log_id,
            agent_name: agent_name.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn delete_engagement(
        &self,
        kind: EngagementKind,
        log_id: Uuid,
        agent_name: &str,
    ) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        let rows = state.engagements_mut(kind);
        let before = rows.len();
        rows.retain(|row| !(row.log_id == log_id && row.agent_name == agent_name));
        Ok(rows.len() < before)
    }

    async fn list_engagements(
        &self,
        kind: EngagementKind,
        log_ids: &[Uuid],
    ) -> StoreResult<Vec<Engagement>> {
        let state = self.state.read().await;
        Ok(state
            .engagements(kind)
            .iter()
            .filter(|row| log_ids.contains(&row.log_id))
            .cloned()
            .collect())
    }

    async fn is_following(&self, follower: &str, following: &str) -> StoreResult<bool> {
        let state = self.state.read().await;
        Ok(state
            .follows
            .iter()
            .any(|f| f.follower_agent == follower && f.following_agent == following))
    }

    async fn insert_follow(&self, follower: &str, following: &str) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if state
            .follows
            .iter()
            .any(|f| f.follower_agent == follower && f.following_agent == following)
        {
            return Err(StoreError::Conflict("Already following"));
        }
        state.follows.push(Follow {
            follower_agent: follower.to_string(),
            following_agent: following.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn delete_follow(&self, follower: &str, following: &str) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        let before = state.follows.len();
        state
            .follows
            .retain(|f| !(f.follower_agent == follower && f.following_agent == following));
        Ok(state.follows.len() < before)
    }

    async fn followers(&self, agent: &str) -> StoreResult<Vec<Follow>> {
        let state = self.state.read().await;
        Ok(state
            .follows
            .iter()
            .rev()
            .filter(|f| f.following_agent == agent)
            .cloned()
            .collect())
    }

    async fn following(&self, agent: &str) -> StoreResult<Vec<Follow>> {
        let state = self.state.read().await;
        Ok(state
            .follows
            .iter()
            .rev()
            .filter(|f| f.follower_agent == agent)
            .cloned()
            .collect())
    }

    async fn activity(&self, agent: &str) -> StoreResult<Activity> {
        Ok(self.state.read().await.activity(agent))
    }

    async fn all_activity(&self) -> StoreResult<HashMap<String, Activity>> {
        let state = self.state.read().await;
        Ok(state
            .agents
            .iter()
            .map(|agent| (agent.codename.clone(), state.activity(&agent.codename)))
            .collect())
    }
}
