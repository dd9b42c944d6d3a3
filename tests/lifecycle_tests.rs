use anyhow::Result;
use nua::domain::{ContainerState, DeployError, DeployRequest, RunningStatus};
use nua::services::DeployOutcome;
use nua::test_support::{FLASK_MANIFEST, TestHost, WORDPRESS_MANIFEST};

fn site(label: &str, image: &str, domain: &str) -> DeployRequest {
    toml::from_str(&format!(
        "[[site]]\nlabel = \"{label}\"\nimage = \"{image}\"\ndomain = \"{domain}\"\n"
    ))
    .unwrap()
}

fn deployed_blog() -> Result<TestHost> {
    let host = TestHost::new(&[WORDPRESS_MANIFEST, FLASK_MANIFEST]);
    host.engine
        .deploy(&site("blog", "wordpress", "a.example.com"))?;
    host.runtime.clear_commands();
    Ok(host)
}

#[test]
fn test_stop_then_start() -> Result<()> {
    let host = deployed_blog()?;

    assert!(host.engine.stop("blog")?.is_deployed());
    assert_eq!(
        host.runtime.get_state("blog-wordpress"),
        Some(ContainerState::Stopped)
    );
    assert_eq!(
        host.runtime.get_state("blog-database"),
        Some(ContainerState::Stopped)
    );
    assert_eq!(
        host.stored("blog").unwrap().running_status,
        RunningStatus::Stopped
    );
    // main container goes down before its database
    assert_eq!(
        host.runtime.get_commands(),
        ["stop:blog-wordpress", "stop:blog-database"]
    );

    host.runtime.clear_commands();
    assert!(host.engine.start("blog")?.is_deployed());
    assert_eq!(
        host.runtime.get_state("blog-wordpress"),
        Some(ContainerState::Running)
    );
    let commands = host.runtime.get_commands();
    let position = |c: &str| commands.iter().position(|x| x == c).unwrap();
    assert!(position("start:blog-database") < position("start:blog-wordpress"));
    assert_eq!(
        host.stored("blog").unwrap().running_status,
        RunningStatus::Running
    );
    Ok(())
}

#[test]
fn test_pause_and_unpause() -> Result<()> {
    let host = deployed_blog()?;

    host.engine.pause("blog")?;
    assert_eq!(
        host.runtime.get_state("blog-database"),
        Some(ContainerState::Paused)
    );
    let statuses = host.engine.status()?;
    assert_eq!(statuses[0].recorded, RunningStatus::Paused);
    assert!(
        statuses[0]
            .containers
            .iter()
            .all(|(_, state)| *state == ContainerState::Paused)
    );

    host.engine.unpause("blog")?;
    assert_eq!(
        host.runtime.get_state("blog-wordpress"),
        Some(ContainerState::Running)
    );
    assert!(
        !host
            .runtime
            .get_commands()
            .iter()
            .any(|c| c.starts_with("start:"))
    );
    Ok(())
}

#[test]
fn test_restart_recreates_containers() -> Result<()> {
    let host = deployed_blog()?;
    host.engine.restart("blog")?;

    let commands = host.runtime.get_commands();
    assert!(commands.contains(&"stop:blog-wordpress".to_string()));
    assert!(commands.contains(&"start:blog-wordpress".to_string()));
    assert_eq!(
        host.runtime.get_state("blog-wordpress"),
        Some(ContainerState::Running)
    );
    Ok(())
}

#[test]
fn test_unknown_label_is_rejected() -> Result<()> {
    let host = deployed_blog()?;
    let outcome = host.engine.stop("wiki")?;

    let DeployOutcome::Rejected(cause) = outcome else {
        panic!("expected a rejection");
    };
    assert_eq!(
        cause.downcast_ref::<DeployError>(),
        Some(&DeployError::UnknownLabel("wiki".into()))
    );
    assert!(host.runtime.get_commands().is_empty());
    Ok(())
}

#[test]
fn test_remove_drops_data_and_proxy() -> Result<()> {
    let host = deployed_blog()?;
    host.engine
        .merge(&site("app", "flask-one", "app.example.com"))?;

    let outcome = host.engine.remove("blog")?;
    let DeployOutcome::Deployed { record, .. } = outcome else {
        panic!("remove failed");
    };
    let labels: Vec<&str> = record.deployed.iter().map(|i| i.label.as_str()).collect();
    assert_eq!(labels, ["app"]);
    assert_eq!(record.requested.site.len(), 1);

    assert!(host.stored("blog").is_none());
    assert!(!host.runtime.container_exists("blog-wordpress"));
    assert!(!host.runtime.volume_exists("blog-db"));
    assert!(!host.runtime.volume_exists("blog-content"));
    assert!(host.proxy.site("a.example.com").is_none());
    assert!(host.proxy.site("app.example.com").is_some());
    Ok(())
}

#[test]
fn test_restore_replays_active_configuration() -> Result<()> {
    let host = deployed_blog()?;
    host.engine.stop("blog")?;
    host.runtime.clear_commands();

    let outcome = host.engine.restore()?;
    assert!(outcome.is_deployed());
    assert!(host.runtime.container_exists("blog-wordpress"));
    // recorded as stopped, comes back stopped
    assert_eq!(
        host.runtime.get_state("blog-wordpress"),
        Some(ContainerState::Stopped)
    );
    assert!(host.proxy.site("a.example.com").is_some());
    Ok(())
}

#[test]
fn test_status_lists_every_container() -> Result<()> {
    let host = deployed_blog()?;
    let statuses = host.engine.status()?;

    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].label, "blog");
    assert_eq!(statuses[0].app_id, "wordpress");
    let names: Vec<&str> = statuses[0]
        .containers
        .iter()
        .map(|(name, _)| name.as_str())
        .collect();
    assert_eq!(names, ["blog-database", "blog-wordpress"]);
    Ok(())
}

#[test]
fn test_show_request_after_merges() -> Result<()> {
    let host = deployed_blog()?;
    host.engine
        .merge(&site("app", "flask-one", "app.example.com"))?;
    host.engine
        .merge(&site("app", "flask-one", "app2.example.com"))?;

    let snapshot = host.engine.journal().read_current_state()?;
    let domains: Vec<Option<&str>> = snapshot
        .requested
        .site
        .iter()
        .map(|s| s.domain.as_deref())
        .collect();
    assert_eq!(domains, [Some("a.example.com"), Some("app2.example.com")]);
    Ok(())
}
