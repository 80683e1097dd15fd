//! Text of the messages sent to agents.

use warden_core::{Task, TaskStatus};

fn describe(task: &Task) -> String {
    let mut out = format!(
        "Task {id}: {title}\nPriority: {priority}\nStatus: {status}\n",
        id = task.id,
        title = task.title,
        priority = task.priority,
        status = task.status,
    );
    if !task.description.is_empty() {
        out.push_str(&format!("\n{}\n", task.description));
    }
    if let Some(parent) = task.parent_task_id {
        out.push_str(&format!("\nThis is a sub-task of {parent}.\n"));
    }
    out
}

/// New work, dequeued work, or a manual retry.
pub fn assignment(task: &Task) -> String {
    format!(
        "You have been assigned a task.\n\n{}\n\
Move it to planning when you pick it up and keep its status current \
while you work.",
        describe(task)
    )
}

/// Re-notification of a stalled task; carries the same assignment context.
pub fn stall(task: &Task, attempt: u32, max_retries: u32) -> String {
    format!(
        "Reminder ({attempt}/{max_retries}): task {id} has had no status update \
since {updated}.\n\n{body}",
        id = task.id,
        updated = task.updated_at.to_rfc3339(),
        body = assignment(task),
    )
}

/// Sub-task outcome for the parent task's agent.
///
/// `remaining` are the parent's other sub-tasks that are not yet terminal.
pub fn delegation(subtask: &Task, final_status: TaskStatus, parent: &Task, remaining: &[Task]) -> String {
    let specialist = subtask.assigned_agent_id.as_deref().unwrap_or("unassigned");
    let mut out = format!(
        "Delegated sub-task finished.\n\n\
Sub-task: {sub_id} \"{sub_title}\"\n\
Final status: {final_status}\n\
Specialist: {specialist}\n\
Parent task: {parent_id} \"{parent_title}\"\n",
        sub_id = subtask.id,
        sub_title = subtask.title,
        parent_id = parent.id,
        parent_title = parent.title,
    );
    if remaining.is_empty() {
        out.push_str("\nNo other sub-tasks of the parent are still open.\n");
    } else {
        out.push_str(&format!("\n{} sub-task(s) still open:\n", remaining.len()));
        for sibling in remaining {
            out.push_str(&format!(
                "- {} \"{}\" ({})\n",
                sibling.id, sibling.title, sibling.status
            ));
        }
    }
    out.push_str(&format!(
        "\nFetch the results and comments of sub-task {} before deciding the next step \
for the parent task.",
        subtask.id
    ));
    out
}

/// Rework request for the sub-task's specialist.
pub fn change_request(subtask: &Task, comment: &str) -> String {
    format!(
        "Changes were requested on your task.\n\n{}\nReviewer comment:\n{comment}\n\n\
The task is back in executing.",
        describe(subtask)
    )
}
