use anyhow::Result;
use nua::domain::{DeployRequest, DeployState};
use nua::services::DeployOutcome;
use nua::test_support::{FLASK_MANIFEST, TestHost, WORDPRESS_MANIFEST};
use nua::Store;

fn site(label: &str, image: &str, domain: &str) -> DeployRequest {
    toml::from_str(&format!(
        "[[site]]\nlabel = \"{label}\"\nimage = \"{image}\"\ndomain = \"{domain}\"\n"
    ))
    .unwrap()
}

#[test]
fn test_failed_merge_rolls_back_to_previous_record() -> Result<()> {
    let host = TestHost::new(&[WORDPRESS_MANIFEST, FLASK_MANIFEST]);
    host.engine
        .deploy(&site("blog", "wordpress", "a.example.com"))?;
    let password = host.stored("blog").unwrap().persistent["database"]["MARIADB_PASSWORD"].clone();

    host.runtime.set_fail_on("start:wiki-flask-one");
    let outcome = host
        .engine
        .merge(&site("wiki", "flask-one", "wiki.example.com"))?;

    let DeployOutcome::RolledBack { cause, restored } = outcome else {
        panic!("expected a rollback, got {outcome:?}");
    };
    assert!(format!("{cause:#}").contains("wiki-flask-one"));
    let restored = restored.unwrap();
    assert_eq!(restored.id, 1);

    let active = host.active_records();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, 1);
    assert!(active[0].deployed.iter().all(|i| i.label != "wiki"));

    let failed = host.store.records(Some(DeployState::Failed))?;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].deployed[0].label, "wiki");

    assert!(host.stored("wiki").is_none());
    assert!(!host.runtime.container_exists("wiki-flask-one"));
    assert!(host.runtime.container_exists("blog-wordpress"));
    assert!(host.runtime.container_exists("blog-database"));
    // replay never touches volumes
    assert!(
        !host
            .runtime
            .get_commands()
            .iter()
            .any(|c| c.starts_with("remove_volume:"))
    );
    assert_eq!(
        host.stored("blog").unwrap().persistent["database"]["MARIADB_PASSWORD"],
        password
    );
    assert!(host.proxy.site("wiki.example.com").is_none());
    Ok(())
}

#[test]
fn test_failed_first_deploy_cleans_up() -> Result<()> {
    let host = TestHost::new(&[WORDPRESS_MANIFEST]);
    host.runtime.set_fail_on("start:blog-wordpress");

    let outcome = host
        .engine
        .deploy(&site("blog", "wordpress", "a.example.com"))?;

    let DeployOutcome::RolledBack { restored, .. } = outcome else {
        panic!("expected a rollback");
    };
    assert!(restored.is_none());
    assert!(host.active_records().is_empty());
    // the provider started before the failure is gone
    assert!(!host.runtime.container_exists("blog-database"));
    assert!(!host.runtime.network_exists("blog-wordpress"));
    assert_eq!(host.store.records(Some(DeployState::Failed))?.len(), 1);
    Ok(())
}

#[test]
fn test_failed_replay_is_an_error() -> Result<()> {
    let host = TestHost::new(&[FLASK_MANIFEST]);
    host.engine
        .deploy(&site("one", "flask-one", "one.example.com"))?;

    host.runtime.set_fail_on("start");
    let result = host
        .engine
        .merge(&site("two", "flask-one", "two.example.com"));

    let err = result.unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("restoring the previous configuration also failed"));
    Ok(())
}

#[test]
fn test_certificate_failure_is_a_warning() -> Result<()> {
    let host = TestHost::new(&[FLASK_MANIFEST]);
    host.certificates.set_failing(true);

    let outcome = host
        .engine
        .deploy(&site("one", "flask-one", "one.example.com"))?;
    let DeployOutcome::Deployed { warnings, .. } = outcome else {
        panic!("expected a deployment");
    };
    assert!(warnings.iter().any(|w| w.contains("certificate")));
    assert!(host.runtime.container_exists("one-flask-one"));
    Ok(())
}

#[test]
fn test_proxy_failure_rolls_back() -> Result<()> {
    let host = TestHost::new(&[FLASK_MANIFEST]);
    host.engine
        .deploy(&site("one", "flask-one", "one.example.com"))?;

    host.proxy.set_fail_on("render:two.example.com");
    let outcome = host
        .engine
        .merge(&site("two", "flask-one", "two.example.com"))?;

    assert!(matches!(outcome, DeployOutcome::RolledBack { .. }));
    assert!(!host.runtime.container_exists("two-flask-one"));
    assert!(host.runtime.container_exists("one-flask-one"));
    assert_eq!(host.active_records()[0].id, 1);
    Ok(())
}

#[test]
fn test_missing_image_is_pulled() -> Result<()> {
    let host = TestHost::new(&[WORDPRESS_MANIFEST]);
    host.runtime.set_missing_image("mariadb:11");

    host.engine
        .deploy(&site("blog", "wordpress", "a.example.com"))?;
    assert!(
        host.runtime
            .get_commands()
            .contains(&"pull:mariadb:11".to_string())
    );
    Ok(())
}

#[test]
fn test_proxy_restart_when_reload_fails() -> Result<()> {
    let host = TestHost::new(&[FLASK_MANIFEST]);
    host.proxy.set_fail_on("reload");

    let outcome = host
        .engine
        .deploy(&site("one", "flask-one", "one.example.com"))?;
    assert!(outcome.is_deployed());
    assert_eq!(
        host.proxy.get_commands().last().map(String::as_str),
        Some("restart")
    );
    Ok(())
}
