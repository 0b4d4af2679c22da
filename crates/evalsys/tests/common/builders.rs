//! Builders for evaluations, groups and users.

#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};

use evalsys::db::{assignment_repo, evaluation_repo, response_repo, user_repo};
use evalsys::model::{AssignGroup, AssignType, AssignUser, EvalState, Evaluation, User};
use evalsys::Database;

/// Builder for stored evaluations. Dates are offsets from `now`.
pub struct EvalBuilder {
    eval: Evaluation,
    now: DateTime<Utc>,
}

impl EvalBuilder {
    /// Started an hour ago, no due date, state `active`.
    pub fn new(now: DateTime<Utc>) -> Self {
        let mut eval = Evaluation::new("admin", "Course feedback", now - Duration::hours(1));
        eval.state = EvalState::Active;
        Self { eval, now }
    }

    pub fn title(mut self, title: &str) -> Self {
        self.eval.title = title.to_string();
        self
    }

    pub fn state(mut self, state: EvalState) -> Self {
        self.eval.state = state;
        self
    }

    pub fn starts_in(mut self, offset: Duration) -> Self {
        self.eval.start_date = self.now + offset;
        self
    }

    pub fn due_in(mut self, offset: Duration) -> Self {
        self.eval.due_date = Some(self.now + offset);
        self
    }

    pub fn stops_in(mut self, offset: Duration) -> Self {
        self.eval.stop_date = Some(self.now + offset);
        self
    }

    pub fn viewable_in(mut self, offset: Duration) -> Self {
        self.eval.view_date = Some(self.now + offset);
        self
    }

    pub fn anonymous(mut self) -> Self {
        self.eval.anonymous = true;
        self
    }

    pub fn reminder_days(mut self, days: u32) -> Self {
        self.eval.reminder_days = days;
        self
    }

    pub fn build(self) -> Evaluation {
        self.eval
    }

    /// Stores the evaluation and returns its id.
    pub fn insert(self, db: &Database) -> i64 {
        evaluation_repo::insert(db, &self.eval, self.now).expect("Failed to insert evaluation")
    }
}

/// Builder for one group of an evaluation with its members.
pub struct GroupBuilder {
    group: AssignGroup,
    evaluators: Vec<String>,
    evaluatees: Vec<String>,
}

impl GroupBuilder {
    pub fn new(eval_id: i64, group_id: &str) -> Self {
        Self {
            group: AssignGroup::new(eval_id, group_id, &format!("Section {}", group_id)),
            evaluators: Vec::new(),
            evaluatees: Vec::new(),
        }
    }

    pub fn evaluators(mut self, users: &[&str]) -> Self {
        self.evaluators.extend(users.iter().map(|u| u.to_string()));
        self
    }

    pub fn evaluatees(mut self, users: &[&str]) -> Self {
        self.evaluatees.extend(users.iter().map(|u| u.to_string()));
        self
    }

    pub fn unapproved(mut self) -> Self {
        self.group.instructor_approval = false;
        self
    }

    /// Stores the group, its assignments and a directory entry per user.
    pub fn insert(self, db: &Database, now: DateTime<Utc>) {
        assignment_repo::insert_group(db, &self.group, now).expect("Failed to insert group");
        let members = self
            .evaluators
            .iter()
            .map(|u| (u, AssignType::Evaluator))
            .chain(self.evaluatees.iter().map(|u| (u, AssignType::Evaluatee)));
        for (order, (user_id, assign_type)) in members.enumerate() {
            add_user(db, user_id);
            let mut assignment =
                AssignUser::new(self.group.eval_id, user_id, &self.group.group_id, assign_type);
            assignment.list_order = order as i64;
            assignment_repo::insert_user(db, &assignment, now).expect("Failed to insert assignment");
        }
    }
}

/// Adds `user_id` to the directory with address `user_id@example.edu`.
pub fn add_user(db: &Database, user_id: &str) {
    user_repo::upsert(
        db,
        &User {
            user_id: user_id.to_string(),
            email: Some(format!("{}@example.edu", user_id)),
            display_name: user_id.to_uppercase(),
            locale: None,
        },
    )
    .expect("Failed to upsert user");
}

/// Records a submitted response.
pub fn submit(db: &Database, eval_id: i64, user_id: &str, group_id: &str, at: DateTime<Utc>) {
    response_repo::complete(db, eval_id, user_id, group_id, at).expect("Failed to complete response");
}

/// Records an opened but unsubmitted response.
pub fn open_response(db: &Database, eval_id: i64, user_id: &str, group_id: &str, at: DateTime<Utc>) {
    response_repo::start(db, eval_id, user_id, group_id, at).expect("Failed to start response");
}

/// `count` users `prefix1..=prefixN`.
pub fn user_ids(prefix: &str, count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("{}{:03}", prefix, i)).collect()
}
