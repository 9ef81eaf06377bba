use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{fmt_iso, now_ms};
use super::{Engine, EngineError, RuleViolation};

fn module_view(m: CourseModule) -> ModuleView {
    ModuleView {
        id: m.id,
        course_id: m.course_id,
        title: m.title,
        content: m.content,
        module_order: m.module_order,
    }
}

fn course_summary(c: Course) -> CourseSummary {
    CourseSummary {
        id: c.id,
        title: c.title,
        description: c.description,
        target_audience: c.target_audience,
    }
}

fn progress_view(row: &CourseProgress) -> ProgressView {
    ProgressView {
        id: row.id,
        user_id: row.user_id,
        course_id: row.course_id,
        last_module_id: row.last_module_id,
        is_completed: row.completed,
        completion_date: row.completion_date.map(fmt_iso),
    }
}

impl Engine {
    /// Create a course together with its ordered modules. One event, so the
    /// multi-row write is all-or-nothing — there is no window where the
    /// course exists without its modules.
    pub async fn create_course(
        &self,
        title: &str,
        description: &str,
        target_audience: &str,
        module_drafts: Vec<ModuleDraft>,
    ) -> Result<CourseDetail, EngineError> {
        if title.is_empty() || title.len() > MAX_TITLE_LEN {
            return Err(EngineError::LimitExceeded("course title length"));
        }
        if description.len() > MAX_DESCRIPTION_LEN {
            return Err(EngineError::LimitExceeded("course description too long"));
        }
        if target_audience.len() > MAX_AUDIENCE_LEN {
            return Err(EngineError::LimitExceeded("target audience too long"));
        }
        if module_drafts.len() > MAX_MODULES_PER_COURSE {
            return Err(EngineError::LimitExceeded("too many modules"));
        }
        for draft in &module_drafts {
            if draft.title.is_empty() || draft.title.len() > MAX_TITLE_LEN {
                return Err(EngineError::LimitExceeded("module title length"));
            }
            if draft.content.len() > MAX_MODULE_CONTENT_LEN {
                return Err(EngineError::LimitExceeded("module content too long"));
            }
        }

        let course = Course {
            id: Ulid::new(),
            title: title.to_string(),
            description: description.to_string(),
            target_audience: target_audience.to_string(),
            active: true,
            created_at: now_ms(),
        };
        let modules: Vec<CourseModule> = module_drafts
            .into_iter()
            .enumerate()
            .map(|(index, draft)| CourseModule {
                id: Ulid::new(),
                course_id: course.id,
                title: draft.title,
                content: draft.content,
                module_order: index as u32 + 1,
            })
            .collect();

        let event = Event::CourseCreated {
            course: course.clone(),
            modules: modules.clone(),
        };
        self.persist_global(&event).await?;

        Ok(CourseDetail {
            course: course_summary(course),
            modules: modules.into_iter().map(module_view).collect(),
            current_module: None,
            is_completed: false,
        })
    }

    /// Active courses, optionally narrowed by audience tag (case-insensitive
    /// match) and a title/description substring search.
    pub fn list_courses(&self, audience: Option<&str>, search: Option<&str>) -> Vec<CourseSummary> {
        let needle = search.map(|s| s.to_lowercase());
        let mut courses: Vec<Course> = self
            .store
            .courses()
            .into_iter()
            .filter(|c| c.active)
            .filter(|c| {
                audience.is_none_or(|a| c.target_audience.eq_ignore_ascii_case(a))
            })
            .filter(|c| {
                needle.as_deref().is_none_or(|n| {
                    c.title.to_lowercase().contains(n)
                        || c.description.to_lowercase().contains(n)
                })
            })
            .collect();
        courses.sort_by_key(|c| c.created_at);
        courses.into_iter().map(course_summary).collect()
    }

    /// Mark a course inactive; it drops out of listings but enrolled users
    /// keep their progress.
    pub async fn deactivate_course(&self, course_id: Ulid) -> Result<(), EngineError> {
        if self.store.course(&course_id).is_none() {
            return Err(EngineError::NotFound("course", course_id));
        }
        self.persist_global(&Event::CourseDeactivated { id: course_id })
            .await
    }

    /// Enroll a user, pointing the new progress row at the first module by
    /// order (none if the course is empty).
    pub async fn enroll(&self, user_id: Ulid, course_id: Ulid) -> Result<ProgressView, EngineError> {
        if self.store.user(&user_id).is_none() {
            return Err(EngineError::NotFound("user", user_id));
        }
        if self.store.course(&course_id).is_none() {
            return Err(EngineError::NotFound("course", course_id));
        }
        if self.store.progress_row(&user_id, &course_id).is_some() {
            return Err(RuleViolation::AlreadyEnrolled.into());
        }

        let row = CourseProgress {
            id: Ulid::new(),
            user_id,
            course_id,
            last_module_id: self.store.first_module_of(&course_id),
            completed: false,
            completion_date: None,
        };
        self.persist_global(&Event::Enrolled(row.clone())).await?;
        metrics::gauge!(crate::observability::PROGRESS_ROWS_ACTIVE).increment(1.0);
        Ok(progress_view(&row))
    }

    /// Complete the user's current module. Advances the pointer to the
    /// successor by `module_order`, or finalizes the course on the last
    /// module (pointer frozen there, completion date stamped).
    pub async fn complete_module(
        &self,
        user_id: Ulid,
        course_id: Ulid,
        module_id: Ulid,
    ) -> Result<CompletionOutcome, EngineError> {
        let row_lock = self
            .store
            .progress_row(&user_id, &course_id)
            .ok_or(EngineError::Rule(RuleViolation::NotEnrolled))?;
        let _commit = self.commit_permit().await;
        let mut row = row_lock.write().await;

        // Completed rows are terminal; the frozen pointer still equals the
        // final module, so this must be rejected before the pointer check.
        if row.completed {
            return Err(RuleViolation::WrongModule.into());
        }
        if row.last_module_id != Some(module_id) {
            return Err(RuleViolation::WrongModule.into());
        }
        let module = self
            .store
            .module(&module_id)
            .ok_or(EngineError::Rule(RuleViolation::ModuleNotFound))?;

        let ordered = self.store.modules_of(&course_id);
        let position = ordered
            .iter()
            .position(|m| m.id == module_id)
            .ok_or(EngineError::Rule(RuleViolation::ModuleNotFound))?;

        let (event, message) = match ordered.get(position + 1) {
            Some(next) => (
                Event::ModuleCompleted {
                    user_id,
                    course_id,
                    last_module_id: next.id,
                    completed: false,
                    completed_at: None,
                },
                format!(
                    "Completed module '{}'. Next up: '{}'.",
                    module.title, next.title
                ),
            ),
            None => {
                let course = self
                    .store
                    .course(&course_id)
                    .ok_or(EngineError::NotFound("course", course_id))?;
                (
                    Event::ModuleCompleted {
                        user_id,
                        course_id,
                        last_module_id: module_id,
                        completed: true,
                        completed_at: Some(now_ms()),
                    },
                    format!("Course '{}' completed. Congratulations!", course.title),
                )
            }
        };
        self.persist_to_progress(&mut row, &event).await?;

        Ok(CompletionOutcome {
            message,
            progress: progress_view(&row),
        })
    }

    /// Course metadata + ordered modules, plus the caller's position when
    /// enrolled. Anonymous or unenrolled callers get nulls, never an error.
    pub async fn course_detail(
        &self,
        course_id: Ulid,
        user_id: Option<Ulid>,
    ) -> Result<CourseDetail, EngineError> {
        let course = self
            .store
            .course(&course_id)
            .ok_or(EngineError::NotFound("course", course_id))?;
        let modules: Vec<ModuleView> = self
            .store
            .modules_of(&course_id)
            .into_iter()
            .map(module_view)
            .collect();

        let (current_module, is_completed) =
            match user_id.and_then(|u| self.store.progress_row(&u, &course_id)) {
                Some(row_lock) => {
                    let row = row_lock.read().await;
                    let current = row
                        .last_module_id
                        .and_then(|id| self.store.module(&id))
                        .map(module_view);
                    (current, row.completed)
                }
                None => (None, false),
            };

        Ok(CourseDetail {
            course: course_summary(course),
            modules,
            current_module,
            is_completed,
        })
    }

    /// Every course the user is enrolled in, with their current position.
    pub async fn progress_overview(&self, user_id: Ulid) -> Vec<ProgressSummary> {
        let mut out = Vec::new();
        for row_lock in self.store.progress_rows_for_user(&user_id) {
            let row = row_lock.read().await;
            let Some(course) = self.store.course(&row.course_id) else {
                continue;
            };
            out.push(ProgressSummary {
                course_id: course.id,
                course_title: course.title,
                progress_id: row.id,
                is_completed: row.completed,
                current_module: row
                    .last_module_id
                    .and_then(|id| self.store.module(&id))
                    .map(module_view),
                completion_date: row.completion_date.map(fmt_iso),
            });
        }
        out.sort_by(|a, b| a.course_title.cmp(&b.course_title));
        out
    }
}
