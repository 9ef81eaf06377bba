use std::path::PathBuf;

use ulid::Ulid;

use super::{Engine, EngineError, RuleViolation};
use crate::model::*;

fn test_journal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("haven_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn fresh_engine(name: &str) -> Engine {
    Engine::new(test_journal_path(name)).unwrap()
}

fn principal(user_id: Ulid, role: Role) -> Principal {
    Principal { user_id, role }
}

/// Deterministic future slot: 2099-01-01, given hour/minute UTC.
fn at(hour: u32, minute: u32) -> String {
    format!("2099-01-01T{hour:02}:{minute:02}:00Z")
}

async fn seed_user(engine: &Engine, email: &str, role: Role) -> Ulid {
    engine
        .register_user(email, "hash", Some(email.split('@').next().unwrap().into()), role)
        .await
        .unwrap()
        .id
}

/// Counselor account with a profile; returns the user id.
async fn seed_counselor(engine: &Engine, email: &str) -> Ulid {
    let id = seed_user(engine, email, Role::Counselor).await;
    engine
        .upsert_counselor_profile(id, "anxiety", None, None)
        .await
        .unwrap();
    id
}

async fn seed_course(engine: &Engine, title: &str, module_titles: &[&str]) -> CourseDetail {
    let drafts = module_titles
        .iter()
        .map(|t| ModuleDraft {
            title: t.to_string(),
            content: format!("{t} content"),
        })
        .collect();
    engine
        .create_course(title, "a course", "students", drafts)
        .await
        .unwrap()
}

// ── Booking ─────────────────────────────────────────────────────

#[tokio::test]
async fn booking_creates_pending_appointment() {
    let engine = fresh_engine("book_pending.journal");
    let counselor = seed_counselor(&engine, "carla@haven.test").await;
    let user = seed_user(&engine, "uma@haven.test", Role::User).await;

    let receipt = engine
        .create_appointment(&principal(user, Role::User), counselor, &at(10, 0), "stress")
        .await
        .unwrap();
    assert_eq!(receipt.status, AppointmentStatus::Pending);
    assert_eq!(receipt.counselor_user_id, counselor);

    let page = engine
        .list_appointments(&principal(user, Role::User), 1, 20)
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].appointment_id, receipt.appointment_id);
    assert_eq!(page.items[0].end_time, at(11, 0));
}

#[tokio::test]
async fn booking_unknown_counselor_is_not_found() {
    let engine = fresh_engine("book_unknown.journal");
    let user = seed_user(&engine, "uma@haven.test", Role::User).await;

    let err = engine
        .create_appointment(&principal(user, Role::User), Ulid::new(), &at(10, 0), "")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound("user", _)));
}

#[tokio::test]
async fn booking_target_must_hold_counselor_role() {
    let engine = fresh_engine("book_role.journal");
    let admin = seed_user(&engine, "ada@haven.test", Role::Admin).await;
    let other = seed_user(&engine, "omar@haven.test", Role::User).await;
    let user = seed_user(&engine, "uma@haven.test", Role::User).await;

    for target in [admin, other] {
        let err = engine
            .create_appointment(&principal(user, Role::User), target, &at(10, 0), "")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Rule(RuleViolation::InvalidCounselorRole)
        ));
    }
}

#[tokio::test]
async fn booking_requires_counselor_profile() {
    let engine = fresh_engine("book_profile.journal");
    // Counselor role but never set up a profile.
    let counselor = seed_user(&engine, "carla@haven.test", Role::Counselor).await;
    let user = seed_user(&engine, "uma@haven.test", Role::User).await;

    let err = engine
        .create_appointment(&principal(user, Role::User), counselor, &at(10, 0), "")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Rule(RuleViolation::CounselorProfileNotFound)
    ));
}

#[tokio::test]
async fn booking_rejects_malformed_datetime() {
    let engine = fresh_engine("book_badtime.journal");
    let counselor = seed_counselor(&engine, "carla@haven.test").await;
    let user = seed_user(&engine, "uma@haven.test", Role::User).await;

    for bad in ["tomorrow", "2099-13-01T10:00:00Z", ""] {
        let err = engine
            .create_appointment(&principal(user, Role::User), counselor, bad, "")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Rule(RuleViolation::InvalidDatetimeFormat)
        ));
    }
}

#[tokio::test]
async fn booking_in_the_past_fails_for_any_role() {
    let engine = fresh_engine("book_past.journal");
    let counselor = seed_counselor(&engine, "carla@haven.test").await;
    let admin = seed_user(&engine, "ada@haven.test", Role::Admin).await;
    let user = seed_user(&engine, "uma@haven.test", Role::User).await;

    for p in [
        principal(user, Role::User),
        principal(admin, Role::Admin),
        principal(counselor, Role::Counselor),
    ] {
        let err = engine
            .create_appointment(&p, counselor, "2020-06-01T10:00:00Z", "")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Rule(RuleViolation::AppointmentTimeInPast)
        ));
    }
}

#[tokio::test]
async fn pending_requests_may_stack_on_one_slot() {
    let engine = fresh_engine("book_stack.journal");
    let counselor = seed_counselor(&engine, "carla@haven.test").await;
    let a = seed_user(&engine, "a@haven.test", Role::User).await;
    let b = seed_user(&engine, "b@haven.test", Role::User).await;

    engine
        .create_appointment(&principal(a, Role::User), counselor, &at(10, 0), "")
        .await
        .unwrap();
    engine
        .create_appointment(&principal(b, Role::User), counselor, &at(10, 0), "")
        .await
        .unwrap();
}

#[tokio::test]
async fn booking_over_confirmed_slot_conflicts() {
    let engine = fresh_engine("book_over_confirmed.journal");
    let counselor = seed_counselor(&engine, "carla@haven.test").await;
    let user = seed_user(&engine, "uma@haven.test", Role::User).await;

    let first = engine
        .create_appointment(&principal(user, Role::User), counselor, &at(10, 0), "")
        .await
        .unwrap();
    engine
        .update_status(
            &principal(counselor, Role::Counselor),
            first.appointment_id,
            AppointmentStatus::Confirmed,
        )
        .await
        .unwrap();

    let err = engine
        .create_appointment(&principal(user, Role::User), counselor, &at(10, 30), "")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Rule(RuleViolation::AppointmentTimeConflict)
    ));

    // Back-to-back is fine: intervals are half-open.
    engine
        .create_appointment(&principal(user, Role::User), counselor, &at(11, 0), "")
        .await
        .unwrap();
}

#[tokio::test]
async fn first_confirmed_wins_on_overlapping_pendings() {
    let engine = fresh_engine("first_confirmed.journal");
    let counselor = seed_counselor(&engine, "carla@haven.test").await;
    let a = seed_user(&engine, "a@haven.test", Role::User).await;
    let b = seed_user(&engine, "b@haven.test", Role::User).await;
    let cp = principal(counselor, Role::Counselor);

    // Both pending while nothing is confirmed yet.
    let first = engine
        .create_appointment(&principal(a, Role::User), counselor, &at(10, 0), "")
        .await
        .unwrap();
    let second = engine
        .create_appointment(&principal(b, Role::User), counselor, &at(10, 30), "")
        .await
        .unwrap();

    engine
        .update_status(&cp, first.appointment_id, AppointmentStatus::Confirmed)
        .await
        .unwrap();
    let err = engine
        .update_status(&cp, second.appointment_id, AppointmentStatus::Confirmed)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Rule(RuleViolation::AppointmentTimeConflict)
    ));

    // The loser can still be canceled, and the winner stays confirmed.
    engine
        .update_status(&cp, second.appointment_id, AppointmentStatus::Canceled)
        .await
        .unwrap();
    let page = engine
        .list_appointments(&principal(a, Role::User), 1, 20)
        .await
        .unwrap();
    assert_eq!(page.items[0].status, AppointmentStatus::Confirmed);
}

// ── Status transitions ──────────────────────────────────────────

#[tokio::test]
async fn transition_graph_is_role_gated() {
    let engine = fresh_engine("transitions.journal");
    let counselor = seed_counselor(&engine, "carla@haven.test").await;
    let admin = seed_user(&engine, "ada@haven.test", Role::Admin).await;
    let user = seed_user(&engine, "uma@haven.test", Role::User).await;
    let cp = principal(counselor, Role::Counselor);
    let ap = principal(admin, Role::Admin);

    let booked = engine
        .create_appointment(&principal(user, Role::User), counselor, &at(10, 0), "")
        .await
        .unwrap();
    let id = booked.appointment_id;

    // pending → completed is not in the table for anyone.
    for p in [&cp, &ap] {
        let err = engine
            .update_status(p, id, AppointmentStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Rule(RuleViolation::AppointmentStatusInvalidTransition)
        ));
    }

    engine
        .update_status(&cp, id, AppointmentStatus::Confirmed)
        .await
        .unwrap();

    // confirmed → completed is admin-only.
    let err = engine
        .update_status(&cp, id, AppointmentStatus::Completed)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Rule(RuleViolation::AppointmentStatusInvalidTransition)
    ));
    let view = engine
        .update_status(&ap, id, AppointmentStatus::Completed)
        .await
        .unwrap();
    assert_eq!(view.status, AppointmentStatus::Completed);
}

#[tokio::test]
async fn terminal_states_admit_no_transition() {
    let engine = fresh_engine("terminal.journal");
    let counselor = seed_counselor(&engine, "carla@haven.test").await;
    let admin = seed_user(&engine, "ada@haven.test", Role::Admin).await;
    let user = seed_user(&engine, "uma@haven.test", Role::User).await;
    let ap = principal(admin, Role::Admin);

    let booked = engine
        .create_appointment(&principal(user, Role::User), counselor, &at(10, 0), "")
        .await
        .unwrap();
    engine
        .update_status(&ap, booked.appointment_id, AppointmentStatus::Canceled)
        .await
        .unwrap();

    for target in [
        AppointmentStatus::Pending,
        AppointmentStatus::Confirmed,
        AppointmentStatus::Completed,
        AppointmentStatus::Canceled,
    ] {
        let err = engine
            .update_status(&ap, booked.appointment_id, target)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Rule(RuleViolation::AppointmentStatusFinal)
        ));
    }
}

#[tokio::test]
async fn regular_user_can_never_update_status() {
    let engine = fresh_engine("user_update.journal");
    let counselor = seed_counselor(&engine, "carla@haven.test").await;
    let user = seed_user(&engine, "uma@haven.test", Role::User).await;
    let up = principal(user, Role::User);

    let booked = engine
        .create_appointment(&up, counselor, &at(10, 0), "")
        .await
        .unwrap();
    for target in [
        AppointmentStatus::Confirmed,
        AppointmentStatus::Canceled,
        AppointmentStatus::Completed,
    ] {
        let err = engine
            .update_status(&up, booked.appointment_id, target)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Rule(RuleViolation::AppointmentStatusInvalidTransition)
        ));
    }
}

#[tokio::test]
async fn counselors_manage_only_their_own_schedule() {
    let engine = fresh_engine("ownership.journal");
    let carla = seed_counselor(&engine, "carla@haven.test").await;
    let cem = seed_counselor(&engine, "cem@haven.test").await;
    let user = seed_user(&engine, "uma@haven.test", Role::User).await;

    let booked = engine
        .create_appointment(&principal(user, Role::User), carla, &at(10, 0), "")
        .await
        .unwrap();
    let err = engine
        .update_status(
            &principal(cem, Role::Counselor),
            booked.appointment_id,
            AppointmentStatus::Confirmed,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Rule(RuleViolation::AppointmentForbidden)
    ));
}

#[tokio::test]
async fn update_status_unknown_appointment_is_not_found() {
    let engine = fresh_engine("update_missing.journal");
    let admin = seed_user(&engine, "ada@haven.test", Role::Admin).await;

    let err = engine
        .update_status(
            &principal(admin, Role::Admin),
            Ulid::new(),
            AppointmentStatus::Confirmed,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound("appointment", _)));
}

// ── Permissions ─────────────────────────────────────────────────

#[tokio::test]
async fn permissions_mirror_the_transition_guard() {
    let engine = fresh_engine("permissions.journal");
    let carla = seed_counselor(&engine, "carla@haven.test").await;
    let cem = seed_counselor(&engine, "cem@haven.test").await;
    let admin = seed_user(&engine, "ada@haven.test", Role::Admin).await;
    let user = seed_user(&engine, "uma@haven.test", Role::User).await;

    engine
        .create_appointment(&principal(user, Role::User), carla, &at(10, 0), "")
        .await
        .unwrap();

    // The booking user may look but not touch.
    let page = engine
        .list_appointments(&principal(user, Role::User), 1, 20)
        .await
        .unwrap();
    assert!(!page.items[0].permissions.can_update_status);

    // The owning counselor gets the pending options.
    let page = engine
        .list_appointments(&principal(carla, Role::Counselor), 1, 20)
        .await
        .unwrap();
    assert_eq!(
        page.items[0].permissions.allowed_next_status,
        vec![AppointmentStatus::Confirmed, AppointmentStatus::Canceled]
    );

    // Another counselor has no view of carla's schedule at all.
    let page = engine
        .list_appointments(&principal(cem, Role::Counselor), 1, 20)
        .await
        .unwrap();
    assert_eq!(page.total, 0);

    // Admin sees everything with the pending options.
    let page = engine
        .list_appointments(&principal(admin, Role::Admin), 1, 20)
        .await
        .unwrap();
    assert!(page.items[0].permissions.can_update_status);
}

// ── Listing ─────────────────────────────────────────────────────

#[tokio::test]
async fn listing_is_scoped_sorted_and_paginated() {
    let engine = fresh_engine("listing.journal");
    let carla = seed_counselor(&engine, "carla@haven.test").await;
    let cem = seed_counselor(&engine, "cem@haven.test").await;
    let admin = seed_user(&engine, "ada@haven.test", Role::Admin).await;
    let a = seed_user(&engine, "a@haven.test", Role::User).await;
    let b = seed_user(&engine, "b@haven.test", Role::User).await;

    // Book out of time order, across two counselors.
    engine
        .create_appointment(&principal(a, Role::User), carla, &at(14, 0), "")
        .await
        .unwrap();
    engine
        .create_appointment(&principal(a, Role::User), carla, &at(9, 0), "")
        .await
        .unwrap();
    engine
        .create_appointment(&principal(b, Role::User), cem, &at(11, 0), "")
        .await
        .unwrap();

    let page = engine
        .list_appointments(&principal(admin, Role::Admin), 1, 2)
        .await
        .unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.total_pages, 2);
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.items[0].start_time, at(9, 0));
    assert_eq!(page.items[1].start_time, at(11, 0));

    let page2 = engine
        .list_appointments(&principal(admin, Role::Admin), 2, 2)
        .await
        .unwrap();
    assert_eq!(page2.items.len(), 1);
    assert_eq!(page2.items[0].start_time, at(14, 0));

    let mine = engine
        .list_appointments(&principal(b, Role::User), 1, 20)
        .await
        .unwrap();
    assert_eq!(mine.total, 1);

    let carlas = engine
        .list_appointments(&principal(carla, Role::Counselor), 1, 20)
        .await
        .unwrap();
    assert_eq!(carlas.total, 2);
}

#[tokio::test]
async fn listing_tolerates_absurd_page_numbers() {
    let engine = fresh_engine("listing_page_overflow.journal");
    let carla = seed_counselor(&engine, "carla@haven.test").await;
    let admin = seed_user(&engine, "ada@haven.test", Role::Admin).await;
    let user = seed_user(&engine, "uma@haven.test", Role::User).await;

    engine
        .create_appointment(&principal(user, Role::User), carla, &at(10, 0), "")
        .await
        .unwrap();

    // A page number straight from the query string can be anything.
    let page = engine
        .list_appointments(&principal(admin, Role::Admin), usize::MAX, 20)
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert!(page.items.is_empty());
}

#[tokio::test]
async fn listing_resolves_display_names() {
    let engine = fresh_engine("names.journal");
    let carla = seed_counselor(&engine, "carla@haven.test").await;
    // No display name set: falls back to the email.
    let user = engine
        .register_user("uma@haven.test", "hash", None, Role::User)
        .await
        .unwrap()
        .id;

    engine
        .create_appointment(&principal(user, Role::User), carla, &at(10, 0), "")
        .await
        .unwrap();
    let page = engine
        .list_appointments(&principal(user, Role::User), 1, 20)
        .await
        .unwrap();
    assert_eq!(page.items[0].user_name, "uma@haven.test");
    assert_eq!(page.items[0].counselor_name, "carla");
}

// ── Directory ───────────────────────────────────────────────────

#[tokio::test]
async fn email_is_unique_case_insensitively() {
    let engine = fresh_engine("email_unique.journal");
    seed_user(&engine, "uma@haven.test", Role::User).await;

    let err = engine
        .register_user("UMA@Haven.Test", "hash", None, Role::User)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Rule(RuleViolation::EmailTaken)));
}

#[tokio::test]
async fn profile_upsert_requires_counselor_role_and_keeps_id() {
    let engine = fresh_engine("profile_upsert.journal");
    let user = seed_user(&engine, "uma@haven.test", Role::User).await;
    let counselor = seed_user(&engine, "carla@haven.test", Role::Counselor).await;

    let err = engine
        .upsert_counselor_profile(user, "anxiety", None, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Rule(RuleViolation::InvalidCounselorRole)
    ));

    let created = engine
        .upsert_counselor_profile(counselor, "anxiety", None, None)
        .await
        .unwrap();
    let updated = engine
        .upsert_counselor_profile(counselor, "exam stress", Some("MSc".into()), None)
        .await
        .unwrap();
    assert_eq!(created.id, updated.id);

    let listed = engine.list_counselors();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].specialization, "exam stress");
}

// ── Course progress ─────────────────────────────────────────────

#[tokio::test]
async fn enrollment_points_at_the_first_module() {
    let engine = fresh_engine("enroll_first.journal");
    let user = seed_user(&engine, "uma@haven.test", Role::User).await;
    let course = seed_course(&engine, "Mindfulness", &["Intro", "Practice"]).await;

    let progress = engine.enroll(user, course.course.id).await.unwrap();
    assert_eq!(progress.last_module_id, Some(course.modules[0].id));
    assert!(!progress.is_completed);
}

#[tokio::test]
async fn enrollment_in_empty_course_has_no_pointer() {
    let engine = fresh_engine("enroll_empty.journal");
    let user = seed_user(&engine, "uma@haven.test", Role::User).await;
    let course = seed_course(&engine, "Placeholder", &[]).await;

    let progress = engine.enroll(user, course.course.id).await.unwrap();
    assert_eq!(progress.last_module_id, None);
}

#[tokio::test]
async fn enrollment_validates_user_and_course() {
    let engine = fresh_engine("enroll_missing.journal");
    let user = seed_user(&engine, "uma@haven.test", Role::User).await;
    let course = seed_course(&engine, "Mindfulness", &["Intro"]).await;

    let err = engine.enroll(Ulid::new(), course.course.id).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound("user", _)));
    let err = engine.enroll(user, Ulid::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound("course", _)));
}

#[tokio::test]
async fn double_enrollment_is_rejected_and_keeps_one_row() {
    let engine = fresh_engine("enroll_twice.journal");
    let user = seed_user(&engine, "uma@haven.test", Role::User).await;
    let course = seed_course(&engine, "Mindfulness", &["Intro"]).await;

    engine.enroll(user, course.course.id).await.unwrap();
    let err = engine.enroll(user, course.course.id).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Rule(RuleViolation::AlreadyEnrolled)
    ));
    assert_eq!(engine.store.progress_count(), 1);
}

#[tokio::test]
async fn modules_complete_strictly_in_order() {
    let engine = fresh_engine("module_walk.journal");
    let user = seed_user(&engine, "uma@haven.test", Role::User).await;
    let course = seed_course(&engine, "Mindfulness", &["One", "Two", "Three"]).await;
    let cid = course.course.id;
    let m = &course.modules;

    engine.enroll(user, cid).await.unwrap();

    // Jumping ahead is rejected.
    let err = engine.complete_module(user, cid, m[1].id).await.unwrap_err();
    assert!(matches!(err, EngineError::Rule(RuleViolation::WrongModule)));

    let step = engine.complete_module(user, cid, m[0].id).await.unwrap();
    assert_eq!(step.progress.last_module_id, Some(m[1].id));
    assert!(!step.progress.is_completed);
    assert!(step.message.contains("Two"));

    // Repeating the already-passed module fails: the pointer moved on.
    let err = engine.complete_module(user, cid, m[0].id).await.unwrap_err();
    assert!(matches!(err, EngineError::Rule(RuleViolation::WrongModule)));

    engine.complete_module(user, cid, m[1].id).await.unwrap();
    let done = engine.complete_module(user, cid, m[2].id).await.unwrap();
    assert!(done.progress.is_completed);
    assert!(done.progress.completion_date.is_some());
    // Pointer frozen at the final module.
    assert_eq!(done.progress.last_module_id, Some(m[2].id));

    // Completed rows are terminal.
    let err = engine.complete_module(user, cid, m[2].id).await.unwrap_err();
    assert!(matches!(err, EngineError::Rule(RuleViolation::WrongModule)));
}

#[tokio::test]
async fn completing_without_enrollment_fails() {
    let engine = fresh_engine("not_enrolled.journal");
    let user = seed_user(&engine, "uma@haven.test", Role::User).await;
    let course = seed_course(&engine, "Mindfulness", &["Intro"]).await;

    let err = engine
        .complete_module(user, course.course.id, course.modules[0].id)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Rule(RuleViolation::NotEnrolled)));
}

// ── Course catalog ──────────────────────────────────────────────

#[tokio::test]
async fn course_listing_filters_audience_and_search() {
    let engine = fresh_engine("catalog.journal");
    seed_course(&engine, "Exam Stress", &[]).await;
    let course = engine
        .create_course("Sleep Basics", "rest and recovery", "Parents", vec![])
        .await
        .unwrap();

    let all = engine.list_courses(None, None);
    assert_eq!(all.len(), 2);

    let parents = engine.list_courses(Some("parents"), None);
    assert_eq!(parents.len(), 1);
    assert_eq!(parents[0].id, course.course.id);

    let found = engine.list_courses(None, Some("RECOVERY"));
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].title, "Sleep Basics");

    engine.deactivate_course(course.course.id).await.unwrap();
    assert_eq!(engine.list_courses(None, None).len(), 1);
}

#[tokio::test]
async fn course_detail_reflects_caller_progress() {
    let engine = fresh_engine("detail.journal");
    let user = seed_user(&engine, "uma@haven.test", Role::User).await;
    let course = seed_course(&engine, "Mindfulness", &["One", "Two"]).await;
    let cid = course.course.id;

    // Anonymous: modules visible, no position.
    let anon = engine.course_detail(cid, None).await.unwrap();
    assert_eq!(anon.modules.len(), 2);
    assert!(anon.current_module.is_none());
    assert!(!anon.is_completed);

    // Unenrolled caller looks the same.
    let unenrolled = engine.course_detail(cid, Some(user)).await.unwrap();
    assert!(unenrolled.current_module.is_none());

    engine.enroll(user, cid).await.unwrap();
    engine
        .complete_module(user, cid, course.modules[0].id)
        .await
        .unwrap();
    let enrolled = engine.course_detail(cid, Some(user)).await.unwrap();
    assert_eq!(
        enrolled.current_module.as_ref().map(|m| m.id),
        Some(course.modules[1].id)
    );

    let err = engine.course_detail(Ulid::new(), None).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound("course", _)));
}

#[tokio::test]
async fn progress_overview_covers_all_enrollments() {
    let engine = fresh_engine("overview.journal");
    let user = seed_user(&engine, "uma@haven.test", Role::User).await;
    let zen = seed_course(&engine, "Zen", &["Only"]).await;
    let anger = seed_course(&engine, "Anger", &["One", "Two"]).await;

    engine.enroll(user, zen.course.id).await.unwrap();
    engine.enroll(user, anger.course.id).await.unwrap();
    engine
        .complete_module(user, zen.course.id, zen.modules[0].id)
        .await
        .unwrap();

    let overview = engine.progress_overview(user).await;
    assert_eq!(overview.len(), 2);
    // Sorted by course title.
    assert_eq!(overview[0].course_title, "Anger");
    assert!(!overview[0].is_completed);
    assert!(overview[1].is_completed);
    assert!(overview[1].completion_date.is_some());
}

// ── Durability ──────────────────────────────────────────────────

#[tokio::test]
async fn state_survives_restart() {
    let path = test_journal_path("restart.journal");
    let (user, appointment_id, course_id, module2) = {
        let engine = Engine::new(path.clone()).unwrap();
        let counselor = seed_counselor(&engine, "carla@haven.test").await;
        let user = seed_user(&engine, "uma@haven.test", Role::User).await;
        let booked = engine
            .create_appointment(&principal(user, Role::User), counselor, &at(10, 0), "why")
            .await
            .unwrap();
        engine
            .update_status(
                &principal(counselor, Role::Counselor),
                booked.appointment_id,
                AppointmentStatus::Confirmed,
            )
            .await
            .unwrap();
        let course = seed_course(&engine, "Mindfulness", &["One", "Two"]).await;
        engine.enroll(user, course.course.id).await.unwrap();
        engine
            .complete_module(user, course.course.id, course.modules[0].id)
            .await
            .unwrap();
        (
            user,
            booked.appointment_id,
            course.course.id,
            course.modules[1].id,
        )
    };

    let engine = Engine::new(path).unwrap();
    let page = engine
        .list_appointments(&principal(user, Role::User), 1, 20)
        .await
        .unwrap();
    assert_eq!(page.items[0].appointment_id, appointment_id);
    assert_eq!(page.items[0].status, AppointmentStatus::Confirmed);

    let detail = engine.course_detail(course_id, Some(user)).await.unwrap();
    assert_eq!(detail.current_module.map(|m| m.id), Some(module2));
    assert_eq!(engine.list_counselors().len(), 1);
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_journal_path("compact.journal");
    {
        let engine = Engine::new(path.clone()).unwrap();
        let counselor = seed_counselor(&engine, "carla@haven.test").await;
        let user = seed_user(&engine, "uma@haven.test", Role::User).await;
        let booked = engine
            .create_appointment(&principal(user, Role::User), counselor, &at(10, 0), "")
            .await
            .unwrap();
        engine
            .update_status(
                &principal(counselor, Role::Counselor),
                booked.appointment_id,
                AppointmentStatus::Confirmed,
            )
            .await
            .unwrap();
        let course = seed_course(&engine, "Mindfulness", &["One"]).await;
        engine.enroll(user, course.course.id).await.unwrap();

        engine.compact_journal().await.unwrap();
        assert_eq!(engine.journal_appends_since_compact().await, 0);

        // Appends keep working after the swap.
        seed_user(&engine, "late@haven.test", Role::User).await;
    }

    let engine = Engine::new(path).unwrap();
    let admin_view = engine
        .list_appointments(
            &principal(Ulid::new(), Role::Admin),
            1,
            20,
        )
        .await
        .unwrap();
    assert_eq!(admin_view.total, 1);
    assert_eq!(admin_view.items[0].status, AppointmentStatus::Confirmed);
    assert_eq!(engine.store.progress_count(), 1);
    assert!(
        engine
            .store
            .user_id_by_email("late@haven.test")
            .is_some()
    );
}

#[tokio::test]
async fn compaction_under_load_loses_no_commits() {
    let path = test_journal_path("compact_race.journal");
    let counselor;
    let user;
    {
        let engine = std::sync::Arc::new(Engine::new(path.clone()).unwrap());
        counselor = seed_counselor(&engine, "carla@haven.test").await;
        user = seed_user(&engine, "uma@haven.test", Role::User).await;

        // Bookings and compactions race; every acknowledged booking must
        // still be on disk afterwards.
        let mut tasks = Vec::new();
        for hour in 0..20u32 {
            let booking_engine = engine.clone();
            tasks.push(tokio::spawn(async move {
                booking_engine
                    .create_appointment(
                        &principal(user, Role::User),
                        counselor,
                        &at(hour, 0),
                        "",
                    )
                    .await
                    .unwrap();
            }));
            if hour % 4 == 0 {
                let engine = engine.clone();
                tasks.push(tokio::spawn(async move {
                    engine.compact_journal().await.unwrap();
                }));
            }
        }
        for task in tasks {
            task.await.unwrap();
        }
        engine.compact_journal().await.unwrap();
    }

    let engine = Engine::new(path).unwrap();
    let mine = engine
        .list_appointments(&principal(user, Role::User), 1, 50)
        .await
        .unwrap();
    assert_eq!(mine.total, 20);
}
