mod common;

use anime_sync::cdc::{self, ChangeEvent};
use anime_sync::entity::{AnimeSchema, EpisodeSchema, RecordType, SeasonSchema, SeasonStatus};
use anime_sync::fanout::FanOutReport;
use anime_sync::{EngineOptions, Error, Outcome};
use common::{anime_row, envelope, Fixture, BUS_TOPIC, IMAGE_TOPIC, SEARCH_TOPIC};
use serde_json::{json, Value};
use std::collections::BTreeSet;

fn event(before: Value, after: Value) -> ChangeEvent<AnimeSchema> {
    cdc::decode(&envelope(before, after)).unwrap()
}

fn names(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_create_persists_and_fans_out() {
    let fx = Fixture::new();
    let engine = fx.anime_engine(EngineOptions::default());

    let mut after = anime_row("a-1", Some("Death Note"), Some(r#"["Supernatural", "Suspense"]"#));
    after["image_url"] = json!("https://cdn.example/death-note.jpg");

    let outcome = engine.reconcile(&event(Value::Null, after)).await.unwrap();
    assert_eq!(
        outcome,
        Outcome::Created(FanOutReport {
            search_sent: true,
            image_sent: true,
        })
    );

    let row = fx.anime.get("a-1").unwrap();
    assert_eq!(row.title_en.as_deref(), Some("Death Note"));
    assert_eq!(row.record_type, Some(RecordType::Tv));
    assert_eq!(row.rating, Some(8.62));
    assert_eq!(row.start_date.as_deref(), Some("2006-10-04 00:00:00"));
    assert_eq!(fx.tags.tag_names("a-1"), names(&["Supernatural", "Suspense"]));

    let sent = fx.publisher.sent();
    assert_eq!(sent.len(), 2);

    assert_eq!(sent[0].topic, SEARCH_TOPIC);
    assert_eq!(sent[0].key.as_deref(), Some("a-1"));
    assert_eq!(sent[0].body["action"], "create");
    assert_eq!(sent[0].body["data"]["id"], "a-1");
    assert_eq!(sent[0].body["data"]["type"], "TV");

    assert_eq!(sent[1].topic, IMAGE_TOPIC);
    assert_eq!(
        sent[1].body,
        json!({"data": {"name": "death_note", "url": "https://cdn.example/death-note.jpg", "type": "Anime"}})
    );
}

#[tokio::test]
async fn test_image_only_with_url() {
    let fx = Fixture::new();
    let engine = fx.anime_engine(EngineOptions::default());

    let outcome = engine
        .reconcile(&event(Value::Null, anime_row("a-2", Some("Monster"), None)))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        Outcome::Created(FanOutReport {
            search_sent: true,
            image_sent: false,
        })
    );
    assert_eq!(fx.publisher.sent().len(), 1);
    assert_eq!(fx.publisher.sent_to(SEARCH_TOPIC).len(), 1);
}

#[tokio::test]
async fn test_no_titles_skips_fan_out() {
    let fx = Fixture::new();
    let engine = fx.anime_engine(EngineOptions::default());

    let mut after = anime_row("a-3", None, Some(r#"["Drama"]"#));
    after["image_url"] = json!("https://cdn.example/untitled.jpg");

    let outcome = engine.reconcile(&event(Value::Null, after)).await.unwrap();

    assert_eq!(outcome, Outcome::Created(FanOutReport::default()));
    assert!(fx.anime.get("a-3").is_some());
    assert_eq!(fx.tags.tag_names("a-3"), names(&["Drama"]));
    assert!(fx.publisher.sent().is_empty());
}

#[tokio::test]
async fn test_flag_routes_image_to_message_bus() {
    let fx = Fixture::new();
    fx.flags.set_enabled(true);
    let engine = fx.anime_engine(EngineOptions::default());

    let mut after = anime_row("a-4", None, None);
    after["title_jp"] = json!("Shingeki no Kyojin");
    after["image_url"] = json!("https://cdn.example/snk.jpg");

    engine.reconcile(&event(Value::Null, after)).await.unwrap();

    assert!(fx.publisher.sent_to(IMAGE_TOPIC).is_empty());
    let bus = fx.publisher.sent_to(BUS_TOPIC);
    assert_eq!(bus.len(), 1);
    assert_eq!(bus[0].body["data"]["name"], "shingeki_no_kyojin");
    assert_eq!(fx.flags.calls(), 1);
}

#[tokio::test]
async fn test_update_replaces_tags_and_passes_old_title() {
    let fx = Fixture::new();
    let engine = fx.anime_engine(EngineOptions::default());

    let created = anime_row("a-5", Some("Old Name"), Some(r#"["Action", "Comedy"]"#));
    engine.reconcile(&event(Value::Null, created.clone())).await.unwrap();
    assert_eq!(fx.tags.tag_names("a-5"), names(&["Action", "Comedy"]));

    let mut updated = anime_row("a-5", Some("New Name"), Some(r#"["Action", "Drama"]"#));
    updated["rating"] = json!("9.01");

    let outcome = engine.reconcile(&event(created, updated)).await.unwrap();
    assert!(matches!(outcome, Outcome::Updated(report) if report.search_sent));

    assert_eq!(fx.tags.tag_names("a-5"), names(&["Action", "Drama"]));
    assert_eq!(fx.tags.tag_count(), 3);

    let row = fx.anime.get("a-5").unwrap();
    assert_eq!(row.title_en.as_deref(), Some("New Name"));
    assert_eq!(row.rating, Some(9.01));

    assert_eq!(fx.anime.old_title_hints(), vec![None, Some("Old Name".to_string())]);

    let search = fx.publisher.sent_to(SEARCH_TOPIC);
    assert_eq!(search[1].body["action"], "update");
    assert_eq!(search[1].body["data"]["title_en"], "New Name");
}

#[tokio::test]
async fn test_update_clears_tags_on_null_or_invalid_genres() {
    let fx = Fixture::new();
    let engine = fx.anime_engine(EngineOptions::default());

    let tagged = anime_row("a-6", Some("Tagged"), Some(r#"["Action"]"#));
    engine.reconcile(&event(Value::Null, tagged.clone())).await.unwrap();

    let invalid = anime_row("a-6", Some("Tagged"), Some("not valid json"));
    engine.reconcile(&event(tagged.clone(), invalid.clone())).await.unwrap();
    assert!(fx.tags.tag_names("a-6").is_empty());

    engine.reconcile(&event(invalid, tagged.clone())).await.unwrap();
    let cleared = anime_row("a-6", Some("Tagged"), Some(""));
    engine.reconcile(&event(tagged, cleared)).await.unwrap();
    assert!(fx.tags.tag_names("a-6").is_empty());
}

#[tokio::test]
async fn test_replayed_create_is_idempotent() {
    let fx = Fixture::new();
    let engine = fx.anime_engine(EngineOptions::default());
    let change = event(Value::Null, anime_row("a-7", Some("Replay"), Some(r#"["Mystery"]"#)));

    engine.reconcile(&change).await.unwrap();
    let first = fx.anime.get("a-7").unwrap();
    let first_tags = fx.tags.tag_ids("a-7");

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    engine.reconcile(&change).await.unwrap();
    let mut second = fx.anime.get("a-7").unwrap();

    assert_eq!(fx.anime.len(), 1);
    assert_eq!(fx.tags.tag_ids("a-7"), first_tags);
    assert_eq!(second.created_at, first.created_at);
    assert!(second.updated_at > first.updated_at);

    second.updated_at = first.updated_at;
    assert_eq!(second, first);
}

#[tokio::test]
async fn test_delete_removes_row() {
    let fx = Fixture::new();
    let engine = fx.anime_engine(EngineOptions::default());
    let row = anime_row("a-8", Some("Gone Soon"), None);

    engine.reconcile(&event(Value::Null, row.clone())).await.unwrap();
    let published = fx.publisher.sent().len();

    let outcome = engine.reconcile(&event(row, Value::Null)).await.unwrap();
    assert_eq!(outcome, Outcome::Deleted);
    assert!(fx.anime.is_empty());
    assert_eq!(fx.publisher.sent().len(), published);
}

#[tokio::test]
async fn test_delete_missing_is_swallowed_when_configured() {
    let fx = Fixture::new();
    let engine = fx.anime_engine(EngineOptions {
        ignore_missing_on_delete: true,
    });

    let outcome = engine
        .reconcile(&event(anime_row("ghost", Some("Ghost"), None), Value::Null))
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::DeleteSkipped);
}

#[tokio::test]
async fn test_delete_missing_is_error_when_strict() {
    let fx = Fixture::new();
    let engine = fx.anime_engine(EngineOptions {
        ignore_missing_on_delete: false,
    });

    let err = engine
        .reconcile(&event(anime_row("ghost", Some("Ghost"), None), Value::Null))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_flag_failure_aborts_before_persisting() {
    let fx = Fixture::new();
    fx.flags.fail_always();
    let engine = fx.anime_engine(EngineOptions::default());

    let err = engine
        .reconcile(&event(Value::Null, anime_row("a-9", Some("Blocked"), Some(r#"["Drama"]"#))))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::FlagService(_)));
    assert!(fx.anime.is_empty());
    assert_eq!(fx.tags.tag_count(), 0);
    assert!(fx.publisher.sent().is_empty());
}

#[tokio::test]
async fn test_producer_failure_is_hard_error() {
    let fx = Fixture::new();
    fx.publisher.fail_topic(IMAGE_TOPIC);
    let engine = fx.anime_engine(EngineOptions::default());

    let mut after = anime_row("a-10", Some("Half Sent"), None);
    after["image_url"] = json!("https://cdn.example/half.jpg");

    let err = engine.reconcile(&event(Value::Null, after)).await.unwrap_err();
    assert!(matches!(err, Error::Producer { ref topic, .. } if topic == IMAGE_TOPIC));
    assert!(err.is_retryable());

    // Row and search message went out before the failing send.
    assert!(fx.anime.get("a-10").is_some());
    assert_eq!(fx.publisher.sent_to(SEARCH_TOPIC).len(), 1);
}

#[tokio::test]
async fn test_bad_date_is_mapping_error() {
    let fx = Fixture::new();
    let engine = fx.anime_engine(EngineOptions::default());

    let mut after = anime_row("a-11", Some("Bad Date"), None);
    after["start_date"] = json!("04/10/2006");

    let err = engine.reconcile(&event(Value::Null, after)).await.unwrap_err();
    assert!(matches!(err, Error::Mapping { field: "start_date", .. }));
    assert!(fx.anime.is_empty());
    assert!(fx.publisher.sent().is_empty());
}

#[tokio::test]
async fn test_malformed_and_undecodable_input() {
    let fx = Fixture::new();
    let engine = fx.anime_engine(EngineOptions::default());

    let err = engine.reconcile(&event(Value::Null, Value::Null)).await.unwrap_err();
    assert!(matches!(err, Error::MalformedEvent { .. }));
    assert!(!err.is_retryable());
    assert_eq!(fx.flags.calls(), 0);

    let err = cdc::decode::<AnimeSchema>(b"{not json").unwrap_err();
    assert!(matches!(err, Error::Decode { .. }));
}

#[tokio::test]
async fn test_schema_wrapped_envelope() {
    let fx = Fixture::new();
    let engine = fx.anime_engine(EngineOptions::default());

    let body = serde_json::to_vec(&json!({
        "schema": {"type": "struct", "optional": false},
        "payload": {"before": null, "after": anime_row("a-12", Some("Wrapped"), None)}
    }))
    .unwrap();

    let change = cdc::decode::<AnimeSchema>(&body).unwrap();
    engine.reconcile(&change).await.unwrap();
    assert!(fx.anime.get("a-12").is_some());
}

fn season_event(before: Value, after: Value) -> ChangeEvent<SeasonSchema> {
    cdc::decode(&serde_json::to_vec(&json!({"before": before, "after": after})).unwrap()).unwrap()
}

#[tokio::test]
async fn test_season_update_sends_update_action() {
    let fx = Fixture::new();
    let engine = fx.season_engine();

    let before = json!({"id": "s-1", "season": "Fall 2024", "status": "announced", "anime_id": "a-1"});
    let after = json!({"id": "s-1", "season": "Fall 2024", "status": "confirmed", "episode_count": 12, "anime_id": "a-1"});

    let outcome = engine.reconcile(&season_event(before, after)).await.unwrap();
    assert_eq!(
        outcome,
        Outcome::Updated(FanOutReport {
            search_sent: true,
            image_sent: false,
        })
    );

    let row = fx.seasons.get("s-1").unwrap();
    assert_eq!(row.status, SeasonStatus::Confirmed);
    assert_eq!(row.episode_count, Some(12));

    let sent = fx.publisher.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].topic, SEARCH_TOPIC);
    assert_eq!(sent[0].body["action"], "update");
    assert_eq!(sent[0].body["data"]["status"], "confirmed");
    assert_eq!(fx.flags.calls(), 1);
}

#[tokio::test]
async fn test_episode_ignores_flags_and_fan_out() {
    let fx = Fixture::new();
    fx.flags.fail_always();
    let engine = fx.episode_engine();

    let body = serde_json::to_vec(&json!({
        "before": null,
        "after": {
            "id": "e-1",
            "anime_id": "a-1",
            "episode": 1,
            "title_en": "Rebirth",
            "title_jp": "Shinsei",
            "aired": "2006-10-04T01:56:00+09:00",
            "synopsis": null,
            "title_synonyms": null
        }
    }))
    .unwrap();
    let change = cdc::decode::<EpisodeSchema>(&body).unwrap();

    let outcome = engine.reconcile(&change).await.unwrap();
    assert_eq!(outcome, Outcome::Created(FanOutReport::default()));
    assert_eq!(fx.episodes.get("e-1").unwrap().aired.as_deref(), Some("2006-10-04 01:56:00"));
    assert_eq!(fx.flags.calls(), 0);
    assert!(fx.publisher.sent().is_empty());
}
