//! Derives research groups from the flat message sequence.
//!
//! Both hooks run inside the store's mutation, so a reader never sees a
//! message without the research bookkeeping that belongs to it.

use tracing::{info, warn};

use crate::models::{Agent, Message};
use crate::store::state::ConversationState;

pub(crate) fn on_append(state: &mut ConversationState, message: &Message) {
    let Some(agent) = message.agent else {
        return;
    };
    if agent == Agent::Planner {
        state.last_planner_id = Some(message.id.clone());
        return;
    }
    if !agent.is_research_activity() {
        return;
    }

    if state.ongoing_research_id.is_none() {
        start_research(state, &message.id);
    }
    append_activity(state, message, agent);
}

pub(crate) fn on_update(state: &mut ConversationState, message: &Message) {
    let Some(research_id) = state.ongoing_research_id.as_deref() else {
        return;
    };
    if message.is_agent(Agent::Reporter) && !message.is_streaming {
        info!(research_id, message_id = %message.id, "Research report finished");
        state.ongoing_research_id = None;
    }
}

fn start_research(state: &mut ConversationState, research_id: &str) {
    let plan_id = state.last_planner_id.clone();
    if plan_id.is_none() {
        warn!(research_id, "Research started without a preceding plan");
    }

    let activity: Vec<String> = plan_id
        .iter()
        .cloned()
        .chain(std::iter::once(research_id.to_string()))
        .collect();

    state.research_ids.push(research_id.to_string());
    if let Some(plan_id) = plan_id {
        state
            .research_plan_ids
            .insert(research_id.to_string(), plan_id);
    }
    state
        .research_activity_ids
        .insert(research_id.to_string(), activity);
    state.ongoing_research_id = Some(research_id.to_string());
    state.open_research_id = Some(research_id.to_string());
    info!(research_id, "Research started");
}

fn append_activity(state: &mut ConversationState, message: &Message, agent: Agent) {
    let Some(research_id) = state.ongoing_research_id.clone() else {
        return;
    };
    let activity = state
        .research_activity_ids
        .entry(research_id.clone())
        .or_default();
    if !activity.contains(&message.id) {
        activity.push(message.id.clone());
    }
    if agent == Agent::Reporter {
        state
            .research_report_ids
            .insert(research_id, message.id.clone());
    }
}
