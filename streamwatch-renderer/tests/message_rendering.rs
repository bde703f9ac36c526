use std::fs;
use std::time::Duration;

use chrono::Utc;
use streamwatch_core::types::{LiveEntity, OwnerId, StreamId};
use streamwatch_renderer::{AnnouncementContext, CommandErrorContext, Renderer};
use tempfile::TempDir;

fn make_entity() -> LiveEntity {
    LiveEntity {
        id: StreamId::from("40123"),
        owner_id: OwnerId::from("9001"),
        owner_name: "bhopper".to_string(),
        title: "Tier 6 maps tonight".to_string(),
        viewer_count: 42,
        thumbnail_url: "https://static-cdn.example/previews-ttv/live_user_bhopper-{width}x{height}.jpg"
            .to_string(),
    }
}

#[test]
fn announcement_embed_links_channel_and_thumbnail() {
    let renderer = Renderer::new().expect("renderer");
    let ctx = AnnouncementContext::from_entity(
        &make_entity(),
        Some("https://cdn.example/icon.png".to_string()),
        "555",
        987,
        Utc::now(),
    );
    let msg = renderer.announcement(&ctx).expect("render");
    let embed = msg.embed.expect("embed");

    assert_eq!(embed.url.as_deref(), Some("https://twitch.tv/bhopper"));
    let author = embed.author.expect("author");
    assert_eq!(author.name, "bhopper");
    assert_eq!(author.icon_url.as_deref(), Some("https://cdn.example/icon.png"));
    assert_eq!(
        embed.image_url.as_deref(),
        Some("https://static-cdn.example/previews-ttv/live_user_bhopper-1280x720.jpg?q=987")
    );
    assert!(embed.timestamp.is_some());
    assert!(msg.reply_to.is_none());
}

#[test]
fn restart_complete_reports_two_decimal_seconds() {
    let renderer = Renderer::new().expect("renderer");
    let msg = renderer
        .restart_complete(Duration::from_millis(4_250))
        .expect("render");
    assert_eq!(
        msg.embed.and_then(|e| e.description).as_deref(),
        Some("Restart complete! Took 4.25 seconds.")
    );
}

#[test]
fn long_restart_groups_thousands_of_seconds() {
    let renderer = Renderer::new().expect("renderer");
    let msg = renderer
        .restart_complete(Duration::from_millis(1_234_560))
        .expect("render");
    assert_eq!(
        msg.embed.and_then(|e| e.description).as_deref(),
        Some("Restart complete! Took 1,234.56 seconds.")
    );
}

#[test]
fn command_error_report_names_user_command_and_error() {
    let renderer = Renderer::new().expect("renderer");
    let ctx = CommandErrorContext::new("mod#0420", Some("reconcile"), "Store", "HTTP 500");
    let embed = renderer.command_error(&ctx).expect("render");
    assert_eq!(embed.title.as_deref(), Some("Bot Error"));
    assert_eq!(
        embed.description.as_deref(),
        Some("mod#0420 tried executing 'reconcile' but it errored:\n\nStore: HTTP 500")
    );
}

#[test]
fn access_denied_lists_each_failed_check() {
    let renderer = Renderer::new().expect("renderer");
    let checks = vec![
        "You must be a bot admin".to_string(),
        "Command is on cooldown".to_string(),
    ];
    let embed = renderer.access_denied(&checks).expect("render");
    assert_eq!(embed.title.as_deref(), Some("Access Denied"));
    assert_eq!(
        embed.description.as_deref(),
        Some("You must be a bot admin\nCommand is on cooldown")
    );
}

#[test]
fn user_template_overrides_embedded_default() {
    let dir = TempDir::new().expect("template dir");
    fs::create_dir_all(dir.path().join("announcement")).expect("mkdir");
    fs::write(
        dir.path().join("announcement").join("content.tera"),
        "LIVE: {{ owner_name }} ({{ viewer_count }})\n",
    )
    .expect("write override");

    let renderer = Renderer::with_template_dir(Some(dir.path())).expect("renderer");
    let ctx = AnnouncementContext::from_entity(&make_entity(), None, "555", 1, Utc::now());
    let msg = renderer.announcement(&ctx).expect("render");
    assert_eq!(msg.content.as_deref(), Some("LIVE: bhopper (42)"));

    // Non-overridden templates keep their embedded defaults.
    assert_eq!(
        msg.embed.and_then(|e| e.description).as_deref(),
        Some("42 viewers")
    );
}

#[test]
fn missing_template_dir_falls_back_to_embedded() {
    let dir = TempDir::new().expect("tmp");
    let missing = dir.path().join("does-not-exist");
    Renderer::with_template_dir(Some(&missing)).expect("renderer with missing dir");
}
