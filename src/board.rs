use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum number of retained activity log entries. Oldest evicted first.
pub const LOG_CAP: usize = 50;

// ── Entity types ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "Pending",
            TaskStatus::InProgress => "In Progress",
            TaskStatus::Completed => "Completed",
            TaskStatus::Cancelled => "Cancelled",
        }
    }
}

/// A task on the prep board.
///
/// `category` is a plain name referencing the board's category list.
/// Nothing enforces that the name actually exists there — the document
/// format has no referential integrity, and a pull can legally deliver
/// tasks whose category was never created locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,
    pub category: String,
    pub title: String,
    pub status: TaskStatus,
    pub notes: Option<String>,
    /// Calendar date only — the board has no notion of time of day.
    pub deadline: Option<NaiveDate>,
    pub assignee: Option<String>,
    pub last_modified: DateTime<Utc>,
}

/// One line of the audit trail. `task` is None for category-level events.
///
/// `task_title` is the title at the time of logging — a later rename does
/// not rewrite history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: Uuid,
    pub task: Option<Uuid>,
    pub task_title: String,
    pub actor: String,
    pub action: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn task_event(task: Uuid, title: &str, actor: &str, action: String) -> LogEntry {
        LogEntry {
            id: Uuid::new_v4(),
            task: Some(task),
            task_title: title.to_string(),
            actor: actor.to_string(),
            action,
            timestamp: Utc::now(),
        }
    }

    pub fn system_event(title: &str, actor: &str, action: String) -> LogEntry {
        LogEntry {
            id: Uuid::new_v4(),
            task: None,
            task_title: title.to_string(),
            actor: actor.to_string(),
            action,
            timestamp: Utc::now(),
        }
    }
}

/// The complete exchangeable unit of state: all tasks, all categories,
/// the activity log, and a version marker. This is what goes over the
/// wire and into the cache — never a partial update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub last_updated_by: String,
    pub timestamp: DateTime<Utc>,
}

impl Snapshot {
    pub fn empty() -> Snapshot {
        Snapshot {
            tasks: Vec::new(),
            categories: Vec::new(),
            logs: Vec::new(),
            version: 0,
            last_updated_by: String::new(),
            timestamp: Utc::now(),
        }
    }

    /// The default board seeded on first boot when no cache exists.
    pub fn starter() -> Snapshot {
        let now = Utc::now();
        let categories: Vec<String> = ["Venue", "Catering", "Invitations", "Logistics"]
            .iter()
            .map(|c| c.to_string())
            .collect();

        let seeds = [
            ("Venue", "Book the venue"),
            ("Catering", "Shortlist caterers"),
            ("Invitations", "Draft the guest list"),
        ];

        let tasks = seeds
            .iter()
            .map(|(category, title)| Task {
                id: Uuid::new_v4(),
                category: category.to_string(),
                title: title.to_string(),
                status: TaskStatus::Pending,
                notes: None,
                deadline: None,
                assignee: None,
                last_modified: now,
            })
            .collect();

        Snapshot {
            tasks,
            categories,
            logs: Vec::new(),
            version: 0,
            last_updated_by: "system".to_string(),
            timestamp: now,
        }
    }
}

// ── Task updates ───────────────────────────────────────────────

/// Partial edit of a task. Some = set the field, None = leave it alone.
/// There is no way to clear an already-set optional field — the document
/// format never needed one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub status: Option<TaskStatus>,
    pub notes: Option<String>,
    pub deadline: Option<NaiveDate>,
    pub assignee: Option<String>,
    pub category: Option<String>,
}

/// Merge `update` into the task matching `id`, refreshing its
/// `last_modified`. When no task matches, the returned collection is
/// value-equal to the input — a silent, detectable no-op, because the
/// caller may race a concurrent deletion delivered by a pull.
pub fn apply_task_update(tasks: &[Task], id: Uuid, update: &TaskUpdate) -> Vec<Task> {
    tasks
        .iter()
        .map(|t| {
            if t.id != id {
                return t.clone();
            }
            let mut next = t.clone();
            if let Some(title) = &update.title {
                next.title = title.clone();
            }
            if let Some(status) = update.status {
                next.status = status;
            }
            if let Some(notes) = &update.notes {
                next.notes = Some(notes.clone());
            }
            if let Some(deadline) = update.deadline {
                next.deadline = Some(deadline);
            }
            if let Some(assignee) = &update.assignee {
                next.assignee = Some(assignee.clone());
            }
            if let Some(category) = &update.category {
                next.category = category.clone();
            }
            next.last_modified = Utc::now();
            next
        })
        .collect()
}

/// One short phrase for the activity log. When several fields change at
/// once, the most specific one wins:
/// status > rename > assignee > notes > deadline > category.
pub fn describe_task_update(task: &Task, update: &TaskUpdate) -> String {
    if let Some(status) = update.status {
        if status != task.status {
            return format!("marked \"{}\" as {}", task.title, status.label());
        }
    }
    if let Some(title) = &update.title {
        if title != &task.title {
            return format!("renamed \"{}\" to \"{}\"", task.title, title);
        }
    }
    if let Some(assignee) = &update.assignee {
        if task.assignee.as_deref() != Some(assignee.as_str()) {
            return format!("assigned \"{}\" to {}", task.title, assignee);
        }
    }
    if let Some(notes) = &update.notes {
        if task.notes.as_deref() != Some(notes.as_str()) {
            return format!("updated the notes on \"{}\"", task.title);
        }
    }
    if let Some(deadline) = update.deadline {
        if task.deadline != Some(deadline) {
            return format!("moved the deadline of \"{}\" to {}", task.title, deadline);
        }
    }
    if let Some(category) = &update.category {
        if category != &task.category {
            return format!("moved \"{}\" to {}", task.title, category);
        }
    }
    format!("edited \"{}\"", task.title)
}

/// Prepend `entry` and truncate to [`LOG_CAP`]. Newest first.
pub fn append_log(logs: &[LogEntry], entry: LogEntry) -> Vec<LogEntry> {
    let mut next = Vec::with_capacity(logs.len() + 1);
    next.push(entry);
    next.extend_from_slice(logs);
    next.truncate(LOG_CAP);
    next
}

// ── Intents (UI → next snapshot) ──────────────────────────────

/// Something a participant wants to happen to the board. `build_mutation`
/// validates it against the current snapshot and computes the next
/// collections plus an audit log entry.
#[derive(Debug, Clone)]
pub enum Intent {
    CreateTask {
        category: String,
        title: String,
        notes: Option<String>,
        deadline: Option<NaiveDate>,
        assignee: Option<String>,
    },
    UpdateTask {
        id: Uuid,
        update: TaskUpdate,
    },
    DeleteTask {
        id: Uuid,
    },
    CreateCategory {
        name: String,
    },
}

/// Fully-computed next collections, ready for `SyncEngine::mutate`.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub tasks: Vec<Task>,
    pub categories: Vec<String>,
    pub logs: Vec<LogEntry>,
}

/// Turn one intent into the next board state. Returns None when the
/// intent is a no-op: the task is already gone, or the category name is
/// empty or taken. Callers skip the sync round trip in that case.
pub fn build_mutation(snapshot: &Snapshot, intent: Intent, actor: &str) -> Option<Mutation> {
    match intent {
        Intent::CreateTask { category, title, notes, deadline, assignee } => {
            let task = Task {
                id: Uuid::new_v4(),
                category,
                title,
                status: TaskStatus::Pending,
                notes,
                deadline,
                assignee,
                last_modified: Utc::now(),
            };
            let action = format!("added \"{}\" to {}", task.title, task.category);
            let entry = LogEntry::task_event(task.id, &task.title, actor, action);

            let mut tasks = snapshot.tasks.clone();
            tasks.push(task);
            Some(Mutation {
                tasks,
                categories: snapshot.categories.clone(),
                logs: append_log(&snapshot.logs, entry),
            })
        }

        Intent::UpdateTask { id, update } => {
            let task = snapshot.tasks.iter().find(|t| t.id == id)?;
            let action = describe_task_update(task, &update);
            // Log the post-update title so the trail matches what the
            // board shows after the edit.
            let title = update.title.clone().unwrap_or_else(|| task.title.clone());
            let entry = LogEntry::task_event(id, &title, actor, action);

            Some(Mutation {
                tasks: apply_task_update(&snapshot.tasks, id, &update),
                categories: snapshot.categories.clone(),
                logs: append_log(&snapshot.logs, entry),
            })
        }

        Intent::DeleteTask { id } => {
            let task = snapshot.tasks.iter().find(|t| t.id == id)?;
            let action = format!("removed \"{}\"", task.title);
            let entry = LogEntry::task_event(id, &task.title, actor, action);

            Some(Mutation {
                tasks: snapshot.tasks.iter().filter(|t| t.id != id).cloned().collect(),
                categories: snapshot.categories.clone(),
                logs: append_log(&snapshot.logs, entry),
            })
        }

        Intent::CreateCategory { name } => {
            if name.trim().is_empty() || snapshot.categories.contains(&name) {
                return None;
            }
            let entry =
                LogEntry::system_event(&name, actor, format!("created category \"{name}\""));

            let mut categories = snapshot.categories.clone();
            categories.push(name);
            Some(Mutation {
                tasks: snapshot.tasks.clone(),
                categories,
                logs: append_log(&snapshot.logs, entry),
            })
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────
