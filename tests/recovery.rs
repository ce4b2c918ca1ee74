mod common;

use std::fs;
use std::time::Duration;

use common::TestNode;
use vde_manager::ErrorKind;

#[tokio::test]
async fn init_registers_every_workspace_directory() {
    let node = TestNode::master();
    node.manager
        .create_vde("alpha", "alpha_user", "pw1", 7001)
        .await
        .unwrap();
    node.manager
        .create_vde("beta", "beta_user", "pw2", 7002)
        .await
        .unwrap();

    let (manager, supervisor) = node.reopen();
    manager.init().await.unwrap();

    let list = manager.list_processes().unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list["alpha"], "RUNNING");
    assert_eq!(list["beta"], "RUNNING");

    for definition in supervisor.added() {
        assert!(definition.autostart);
        assert!(definition.autorestart);
        assert!(definition.redirect_stderr);
        assert!(!definition.args.iter().any(|arg| arg == "-initDatabase=true"));
        let dir = node.instance_dir(&definition.name);
        assert!(definition
            .args
            .contains(&format!("-configPath={}", dir.join("config.toml").display())));
    }
}

#[tokio::test]
async fn init_creates_missing_root() {
    let node = TestNode::master();

    node.manager.init().await.unwrap();

    assert!(node.dir.path().join("configs").is_dir());
    assert!(node.manager.list_processes().unwrap().is_empty());
}

#[tokio::test]
async fn init_skips_entries_that_are_not_instances() {
    let node = TestNode::master();
    let root = node.dir.path().join("configs");
    fs::create_dir_all(root.join("gamma")).unwrap();
    fs::create_dir_all(root.join("not a name")).unwrap();
    fs::write(root.join("notes.txt"), "scratch").unwrap();

    node.manager.init().await.unwrap();

    let list = node.manager.list_processes().unwrap();
    assert_eq!(list.keys().collect::<Vec<_>>(), vec!["gamma"]);
}

#[tokio::test]
async fn init_twice_does_not_duplicate() {
    let node = TestNode::master();
    fs::create_dir_all(node.instance_dir("gamma")).unwrap();

    node.manager.init().await.unwrap();
    node.manager.init().await.unwrap();

    assert_eq!(node.supervisor.added().len(), 1);
    assert_eq!(node.manager.list_processes().unwrap().len(), 1);
}

#[tokio::test]
async fn unreadable_root_fails_init() {
    let node = TestNode::master();
    fs::write(node.dir.path().join("configs"), "not a directory").unwrap();

    let err = node.manager.init().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Io);
    assert_eq!(err.get("op"), Some("init"));
}

#[tokio::test]
async fn worker_init_is_a_no_op() {
    let node = TestNode::worker();
    fs::create_dir_all(node.instance_dir("gamma")).unwrap();

    node.manager.init().await.unwrap();

    assert!(node.supervisor.added().is_empty());
}

#[tokio::test]
async fn recovered_instance_can_be_deleted() {
    let node = TestNode::master();
    node.manager
        .create_vde("alpha", "alpha_user", "pw1", 7001)
        .await
        .unwrap();

    let (manager, _supervisor) = node.reopen();
    manager.init().await.unwrap();
    manager.delete_vde("alpha").await.unwrap();

    assert!(!node.db.has_role("alpha_user"));
    assert!(!node.instance_dir("alpha").exists());
    assert!(manager.list_processes().unwrap().is_empty());
}

#[tokio::test]
async fn init_does_not_replace_instance_being_created() {
    let node = TestNode::master();
    // Left behind by an earlier attempt that failed after the directory step.
    fs::create_dir_all(node.instance_dir("alpha")).unwrap();
    node.db.slow_statements(Duration::from_millis(20));

    let (created, recovered) = tokio::join!(
        node.manager.create_vde("alpha", "alpha_user", "pw1", 7001),
        node.manager.init()
    );
    created.unwrap();
    recovered.unwrap();

    let added = node.supervisor.added();
    assert_eq!(added.len(), 1);
    assert!(added[0].args.iter().any(|arg| arg == "-initDatabase=true"));
    assert_eq!(node.manager.list_processes().unwrap()["alpha"], "RUNNING");
}
