use std::sync::Arc;

use tempfile::TempDir;

use strongbox::audit::NullAuditSink;
use strongbox::catalog::{Catalog, SqliteCatalog};
use strongbox::config::VaultConfig;
use strongbox::error::Error;
use strongbox::identity::{Actor, IdentityClaims};
use strongbox::types::{Access, PermissionLevel};
use strongbox::vault::{ShareTarget, Vault};

struct TestVault {
    _dir: TempDir,
    catalog: Arc<SqliteCatalog>,
    vault: Vault,
}

fn setup() -> TestVault {
    setup_with_max(500 * 1024 * 1024)
}

fn setup_with_max(max_object_size: u64) -> TestVault {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });

    let dir = TempDir::new().expect("temp dir");
    let config = VaultConfig {
        storage_root: dir.path().join("vault"),
        data_dir: dir.path().to_path_buf(),
        max_object_size,
    };
    let catalog = Arc::new(SqliteCatalog::new(config.db_path()).expect("open catalog"));
    catalog.initialize().expect("initialize catalog");
    let vault = Vault::new(&config, catalog.clone(), Arc::new(NullAuditSink)).expect("vault");

    TestVault {
        _dir: dir,
        catalog,
        vault,
    }
}

fn login(vault: &Vault, username: &str, groups: &[&str]) -> Actor {
    let principal = vault
        .register_login(&IdentityClaims {
            username: username.to_string(),
            display_name: None,
            email: None,
            groups: groups.iter().map(|s| s.to_string()).collect(),
            is_admin: false,
        })
        .expect("login");
    Actor::from(&principal)
}

#[tokio::test]
async fn owner_always_has_full_permission() {
    let t = setup();
    let alice = login(&t.vault, "alice", &[]);

    let record = t
        .vault
        .upload(b"hello", "/", &alice, "notes.txt")
        .await
        .unwrap();

    assert_eq!(
        t.vault
            .access()
            .effective_permission(&alice.id, &record.id, &[])
            .unwrap(),
        Some(PermissionLevel::Full)
    );
    assert_eq!(
        t.vault
            .access()
            .effective_permission(&alice.id, &record.id, &["Any".to_string()])
            .unwrap(),
        Some(PermissionLevel::Full)
    );
}

#[tokio::test]
async fn direct_grant_level_is_honored_exactly() {
    let t = setup();
    let alice = login(&t.vault, "alice", &[]);
    let bob = login(&t.vault, "bob", &[]);

    let record = t
        .vault
        .upload(b"q4 numbers", "/", &alice, "report.pdf")
        .await
        .unwrap();
    t.vault
        .share(
            "/report.pdf",
            &alice,
            &ShareTarget::User("bob".to_string()),
            "write",
        )
        .unwrap();

    let access = t.vault.access();
    assert_eq!(
        access
            .effective_permission(&bob.id, &record.id, &[])
            .unwrap(),
        Some(PermissionLevel::Write)
    );
    assert!(
        access
            .check_permission(&bob.id, &record.id, PermissionLevel::Read, &[])
            .unwrap()
    );
    assert!(
        access
            .check_permission(&bob.id, &record.id, PermissionLevel::Write, &[])
            .unwrap()
    );
    assert!(
        !access
            .check_permission(&bob.id, &record.id, PermissionLevel::Full, &[])
            .unwrap()
    );
}

#[tokio::test]
async fn group_grants_take_highest_rank() {
    let t = setup();
    let alice = login(&t.vault, "alice", &[]);
    let carol = login(&t.vault, "carol", &["Finance", "Engineering"]);
    let dave = login(&t.vault, "dave", &["Marketing"]);

    let record = t
        .vault
        .upload(b"numbers", "/", &alice, "budget.xlsx")
        .await
        .unwrap();
    t.vault
        .share(
            "/budget.xlsx",
            &alice,
            &ShareTarget::Group("Finance".to_string()),
            "read",
        )
        .unwrap();
    t.vault
        .share(
            "/budget.xlsx",
            &alice,
            &ShareTarget::Group("Engineering".to_string()),
            "write",
        )
        .unwrap();

    assert_eq!(
        t.vault
            .access()
            .effective_permission(&carol.id, &record.id, &carol.groups)
            .unwrap(),
        Some(PermissionLevel::Write)
    );
    assert_eq!(
        t.vault
            .access()
            .effective_permission(&dave.id, &record.id, &dave.groups)
            .unwrap(),
        None
    );
}

#[tokio::test]
async fn direct_grant_takes_precedence_over_group_grant() {
    let t = setup();
    let alice = login(&t.vault, "alice", &[]);
    let bob = login(&t.vault, "bob", &["Finance"]);

    let record = t
        .vault
        .upload(b"x", "/", &alice, "plan.txt")
        .await
        .unwrap();
    t.vault
        .share(
            "/plan.txt",
            &alice,
            &ShareTarget::User("bob".to_string()),
            "read",
        )
        .unwrap();
    t.vault
        .share(
            "/plan.txt",
            &alice,
            &ShareTarget::Group("Finance".to_string()),
            "full",
        )
        .unwrap();

    // First tier wins, no aggregation across tiers.
    assert_eq!(
        t.vault
            .access()
            .effective_permission(&bob.id, &record.id, &bob.groups)
            .unwrap(),
        Some(PermissionLevel::Read)
    );
}

#[tokio::test]
async fn create_folder_and_upload_round_trip() {
    let t = setup();
    let alice = login(&t.vault, "alice", &[]);

    t.vault.create_folder("/x", &alice).await.unwrap();

    let root = t.vault.list_directory("/", &alice).await.unwrap();
    let folder = root.iter().find(|e| e.record.filename == "x").unwrap();
    assert!(folder.record.is_folder);
    assert_eq!(folder.access, Access::Owner);

    t.vault
        .upload(b"content", "/x", &alice, "f.txt")
        .await
        .unwrap();
    let listing = t.vault.list_directory("/x", &alice).await.unwrap();
    let file = listing.iter().find(|e| e.record.filename == "f.txt").unwrap();
    assert_eq!(file.record.size, 7);
    assert_eq!(file.record.mime_type.as_deref(), Some("text/plain"));
}

#[tokio::test]
async fn create_folder_twice_already_exists() {
    let t = setup();
    let alice = login(&t.vault, "alice", &[]);

    t.vault.create_folder("/docs", &alice).await.unwrap();
    assert!(matches!(
        t.vault.create_folder("/docs", &alice).await,
        Err(Error::AlreadyExists)
    ));
}

#[tokio::test]
async fn upload_over_size_cap_is_rejected_before_write() {
    let t = setup_with_max(4);
    let alice = login(&t.vault, "alice", &[]);

    let err = t
        .vault
        .upload(b"12345", "/", &alice, "big.bin")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TooLarge { size: 5, max: 4 }));
    assert!(t.vault.list_directory("/", &alice).await.unwrap().is_empty());
}

#[tokio::test]
async fn listing_sorts_folders_before_files() {
    let t = setup();
    let alice = login(&t.vault, "alice", &[]);

    t.vault.upload(b"z", "/", &alice, "z.txt").await.unwrap();
    t.vault.create_folder("/beta", &alice).await.unwrap();
    t.vault.upload(b"a", "/", &alice, "a.txt").await.unwrap();
    t.vault.create_folder("/alpha", &alice).await.unwrap();

    let entries = t.vault.list_directory("/", &alice).await.unwrap();
    let names: Vec<&str> = entries
        .iter()
        .map(|e| e.record.filename.as_str())
        .collect();
    assert_eq!(names, vec!["alpha", "beta", "a.txt", "z.txt"]);
}

#[tokio::test]
async fn shared_file_visible_deletable_copyable_per_level() {
    let t = setup();
    let alice = login(&t.vault, "alice", &[]);
    let bob = login(&t.vault, "bob", &[]);

    t.vault.create_folder("/docs", &alice).await.unwrap();
    t.vault
        .upload(b"quarterly report", "/docs", &alice, "report.pdf")
        .await
        .unwrap();

    // Folder grant lets Bob resolve the listing path; file grant is read-only.
    t.vault
        .share(
            "/docs",
            &alice,
            &ShareTarget::User("bob".to_string()),
            "read",
        )
        .unwrap();
    t.vault
        .share(
            "/docs/report.pdf",
            &alice,
            &ShareTarget::User("bob".to_string()),
            "read",
        )
        .unwrap();

    let listing = t.vault.list_directory("/docs", &bob).await.unwrap();
    let entry = listing
        .iter()
        .find(|e| e.record.filename == "report.pdf")
        .unwrap();
    assert_eq!(entry.access, Access::Shared(PermissionLevel::Read));
    assert_eq!(entry.owner_username, "alice");

    // Read is not enough to delete.
    assert!(matches!(
        t.vault.delete("/docs/report.pdf", &bob).await,
        Err(Error::Forbidden)
    ));

    // But enough to copy into Bob's own namespace.
    t.vault.create_folder("/mine", &bob).await.unwrap();
    let copy = t.vault.copy("/docs/report.pdf", "/mine", &bob).await.unwrap();
    assert_eq!(copy.owner_id, bob.id);
    assert_eq!(copy.path, "/mine/report.pdf");
    assert_eq!(
        t.vault
            .access()
            .effective_permission(&bob.id, &copy.id, &[])
            .unwrap(),
        Some(PermissionLevel::Full)
    );

    let bytes = std::fs::read(
        t.vault
            .resolver()
            .user_root("bob")
            .join("mine/report.pdf"),
    )
    .unwrap();
    assert_eq!(bytes, b"quarterly report");
}

#[tokio::test]
async fn rename_by_write_grant_holder_stays_in_owner_namespace() {
    let t = setup();
    let alice = login(&t.vault, "alice", &[]);
    let bob = login(&t.vault, "bob", &[]);

    t.vault
        .upload(b"draft", "/", &alice, "draft.txt")
        .await
        .unwrap();
    t.vault
        .share(
            "/draft.txt",
            &alice,
            &ShareTarget::User("bob".to_string()),
            "write",
        )
        .unwrap();

    let renamed = t.vault.rename("/draft.txt", "final.txt", &bob).await.unwrap();
    assert_eq!(renamed.path, "/final.txt");
    assert_eq!(renamed.owner_id, alice.id);

    // The physical object moved inside Alice's subdirectory, not Bob's.
    let alice_root = t.vault.resolver().user_root("alice");
    assert!(alice_root.join("final.txt").exists());
    assert!(!alice_root.join("draft.txt").exists());
    assert!(!t.vault.resolver().user_root("bob").join("final.txt").exists());
}

#[tokio::test]
async fn move_requires_write_and_creates_destination_parents() {
    let t = setup();
    let alice = login(&t.vault, "alice", &[]);
    let bob = login(&t.vault, "bob", &[]);

    t.vault.upload(b"x", "/", &alice, "a.txt").await.unwrap();
    t.vault
        .share(
            "/a.txt",
            &alice,
            &ShareTarget::User("bob".to_string()),
            "read",
        )
        .unwrap();

    assert!(matches!(
        t.vault.move_entry("/a.txt", "/archive", &bob).await,
        Err(Error::Forbidden)
    ));

    let moved = t.vault.move_entry("/a.txt", "/archive/2026", &alice).await.unwrap();
    assert_eq!(moved.path, "/archive/2026/a.txt");
    assert_eq!(moved.parent_path, "/archive/2026");
    assert!(
        t.vault
            .resolver()
            .user_root("alice")
            .join("archive/2026/a.txt")
            .exists()
    );
}

#[tokio::test]
async fn unshare_revokes_access() {
    let t = setup();
    let alice = login(&t.vault, "alice", &[]);
    let bob = login(&t.vault, "bob", &[]);
    let mallory = login(&t.vault, "mallory", &[]);

    let record = t.vault.upload(b"x", "/", &alice, "s.txt").await.unwrap();
    let grant = t
        .vault
        .share(
            "/s.txt",
            &alice,
            &ShareTarget::User("bob".to_string()),
            "read",
        )
        .unwrap();

    // Neither the grantee nor a stranger may remove the share.
    assert!(matches!(
        t.vault.unshare(&grant.id, &mallory),
        Err(Error::Forbidden)
    ));

    t.vault.unshare(&grant.id, &alice).unwrap();
    assert_eq!(
        t.vault
            .access()
            .effective_permission(&bob.id, &record.id, &[])
            .unwrap(),
        None
    );
}

#[tokio::test]
async fn delete_cascades_grants() {
    let t = setup();
    let alice = login(&t.vault, "alice", &[]);
    let _bob = login(&t.vault, "bob", &[]);

    t.vault.upload(b"x", "/", &alice, "doomed.txt").await.unwrap();
    let grant = t
        .vault
        .share(
            "/doomed.txt",
            &alice,
            &ShareTarget::User("bob".to_string()),
            "full",
        )
        .unwrap();

    t.vault.delete("/doomed.txt", &alice).await.unwrap();
    assert!(t.catalog.get_grant(&grant.id).unwrap().is_none());
    assert!(
        !t.vault
            .resolver()
            .user_root("alice")
            .join("doomed.txt")
            .exists()
    );
}

#[tokio::test]
async fn reshare_upserts_instead_of_duplicating() {
    let t = setup();
    let alice = login(&t.vault, "alice", &[]);
    let bob = login(&t.vault, "bob", &[]);

    let record = t.vault.upload(b"x", "/", &alice, "r.txt").await.unwrap();
    let first = t
        .vault
        .share(
            "/r.txt",
            &alice,
            &ShareTarget::User("bob".to_string()),
            "read",
        )
        .unwrap();
    let second = t
        .vault
        .share(
            "/r.txt",
            &alice,
            &ShareTarget::User("bob".to_string()),
            "full",
        )
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(t.vault.list_shares("/r.txt", &alice).unwrap().len(), 1);
    assert_eq!(
        t.vault
            .access()
            .effective_permission(&bob.id, &record.id, &[])
            .unwrap(),
        Some(PermissionLevel::Full)
    );
}

#[tokio::test]
async fn full_grant_holder_can_reshare() {
    let t = setup();
    let alice = login(&t.vault, "alice", &[]);
    let bob = login(&t.vault, "bob", &[]);
    let carol = login(&t.vault, "carol", &[]);

    let record = t.vault.upload(b"x", "/", &alice, "team.txt").await.unwrap();
    t.vault
        .share(
            "/team.txt",
            &alice,
            &ShareTarget::User("bob".to_string()),
            "full",
        )
        .unwrap();

    // Bob references the owner's canonical path via the shared-access fallback.
    t.vault
        .share(
            "/team.txt",
            &bob,
            &ShareTarget::User("carol".to_string()),
            "read",
        )
        .unwrap();

    assert_eq!(
        t.vault
            .access()
            .effective_permission(&carol.id, &record.id, &[])
            .unwrap(),
        Some(PermissionLevel::Read)
    );

    // A read-grant holder cannot.
    t.vault
        .share(
            "/team.txt",
            &alice,
            &ShareTarget::User("carol".to_string()),
            "read",
        )
        .unwrap();
    assert!(matches!(
        t.vault.share(
            "/team.txt",
            &carol,
            &ShareTarget::User("bob".to_string()),
            "read",
        ),
        Err(Error::Forbidden)
    ));
}

#[tokio::test]
async fn listing_dedupes_user_and_group_grants_keeping_highest() {
    let t = setup();
    let alice = login(&t.vault, "alice", &[]);
    let bob = login(&t.vault, "bob", &["Finance"]);

    t.vault.create_folder("/books", &alice).await.unwrap();
    t.vault
        .upload(b"x", "/books", &alice, "ledger.csv")
        .await
        .unwrap();
    t.vault
        .share(
            "/books",
            &alice,
            &ShareTarget::User("bob".to_string()),
            "read",
        )
        .unwrap();
    t.vault
        .share(
            "/books/ledger.csv",
            &alice,
            &ShareTarget::User("bob".to_string()),
            "read",
        )
        .unwrap();
    t.vault
        .share(
            "/books/ledger.csv",
            &alice,
            &ShareTarget::Group("Finance".to_string()),
            "write",
        )
        .unwrap();

    let listing = t.vault.list_directory("/books", &bob).await.unwrap();
    let matches: Vec<_> = listing
        .iter()
        .filter(|e| e.record.filename == "ledger.csv")
        .collect();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].access, Access::Shared(PermissionLevel::Write));
}

#[tokio::test]
async fn inaccessible_paths_are_not_found_not_forbidden() {
    let t = setup();
    let alice = login(&t.vault, "alice", &[]);
    let bob = login(&t.vault, "bob", &[]);

    t.vault
        .upload(b"secret", "/", &alice, "secret.txt")
        .await
        .unwrap();

    // Bob holds no grant at all: the record's existence must not leak.
    assert!(matches!(
        t.vault.delete("/secret.txt", &bob).await,
        Err(Error::NotFound)
    ));
    assert!(matches!(
        t.vault.rename("/secret.txt", "mine.txt", &bob).await,
        Err(Error::NotFound)
    ));
    assert!(matches!(
        t.vault.list_directory("/elsewhere", &bob).await,
        Err(Error::NotFound)
    ));
}

#[tokio::test]
async fn ambiguous_shared_path_prefers_most_recently_modified() {
    let t = setup();
    let alice = login(&t.vault, "alice", &[]);
    let bob = login(&t.vault, "bob", &[]);
    let carol = login(&t.vault, "carol", &[]);

    t.vault
        .upload(b"from alice", "/", &alice, "same.txt")
        .await
        .unwrap();
    std::thread::sleep(std::time::Duration::from_millis(10));
    t.vault
        .upload(b"from bob", "/", &bob, "same.txt")
        .await
        .unwrap();

    t.vault
        .share(
            "/same.txt",
            &alice,
            &ShareTarget::User("carol".to_string()),
            "read",
        )
        .unwrap();
    t.vault
        .share(
            "/same.txt",
            &bob,
            &ShareTarget::User("carol".to_string()),
            "read",
        )
        .unwrap();

    let copy = t.vault.copy("/same.txt", "/", &carol).await.unwrap();
    let bytes = std::fs::read(t.vault.resolver().user_root("carol").join("same.txt")).unwrap();
    assert_eq!(bytes, b"from bob");
    assert_eq!(copy.owner_id, carol.id);
}

#[tokio::test]
async fn traversal_and_bad_levels_are_rejected() {
    let t = setup();
    let alice = login(&t.vault, "alice", &[]);

    assert!(matches!(
        t.vault.list_directory("/../../etc", &alice).await,
        Err(Error::InvalidPath(_))
    ));
    assert!(matches!(
        t.vault.create_folder("/a/../../escape", &alice).await,
        Err(Error::InvalidPath(_))
    ));

    t.vault.upload(b"x", "/", &alice, "f.txt").await.unwrap();
    assert!(matches!(
        t.vault.share(
            "/f.txt",
            &alice,
            &ShareTarget::User("alice".to_string()),
            "admin",
        ),
        Err(Error::InvalidLevel(_))
    ));
}

#[tokio::test]
async fn share_with_unknown_user_is_not_found() {
    let t = setup();
    let alice = login(&t.vault, "alice", &[]);

    t.vault.upload(b"x", "/", &alice, "f.txt").await.unwrap();
    assert!(matches!(
        t.vault.share(
            "/f.txt",
            &alice,
            &ShareTarget::User("nobody".to_string()),
            "read",
        ),
        Err(Error::NotFound)
    ));
}

#[tokio::test]
async fn shared_with_me_collects_grants_across_owners() {
    let t = setup();
    let alice = login(&t.vault, "alice", &[]);
    let bob = login(&t.vault, "bob", &[]);
    let carol = login(&t.vault, "carol", &["Finance"]);

    t.vault.upload(b"a", "/", &alice, "a.txt").await.unwrap();
    t.vault.upload(b"b", "/", &bob, "b.txt").await.unwrap();
    t.vault
        .share(
            "/a.txt",
            &alice,
            &ShareTarget::User("carol".to_string()),
            "read",
        )
        .unwrap();
    t.vault
        .share(
            "/b.txt",
            &bob,
            &ShareTarget::Group("Finance".to_string()),
            "write",
        )
        .unwrap();

    let shared = t.vault.shared_with_me(&carol).unwrap();
    assert_eq!(shared.len(), 2);
    let names: Vec<&str> = shared.iter().map(|e| e.record.filename.as_str()).collect();
    assert!(names.contains(&"a.txt"));
    assert!(names.contains(&"b.txt"));
}

#[tokio::test]
async fn copy_folder_recursively_reowns_tree() {
    let t = setup();
    let alice = login(&t.vault, "alice", &[]);
    let bob = login(&t.vault, "bob", &[]);

    t.vault.create_folder("/proj", &alice).await.unwrap();
    t.vault.create_folder("/proj/sub", &alice).await.unwrap();
    t.vault
        .upload(b"deep", "/proj/sub", &alice, "deep.txt")
        .await
        .unwrap();
    t.vault
        .share(
            "/proj",
            &alice,
            &ShareTarget::User("bob".to_string()),
            "read",
        )
        .unwrap();

    let copy = t.vault.copy("/proj", "/", &bob).await.unwrap();
    assert!(copy.is_folder);
    assert_eq!(copy.owner_id, bob.id);
    assert_eq!(
        std::fs::read(t.vault.resolver().user_root("bob").join("proj/sub/deep.txt")).unwrap(),
        b"deep"
    );
}

#[tokio::test]
async fn login_upsert_refreshes_groups_and_keeps_id() {
    let t = setup();
    let first = login(&t.vault, "alice", &["Old"]);
    let second = login(&t.vault, "alice", &["New"]);

    assert_eq!(first.id, second.id);
    assert_eq!(second.groups, vec!["New".to_string()]);
    assert!(t.vault.resolver().user_root("alice").is_dir());
}
