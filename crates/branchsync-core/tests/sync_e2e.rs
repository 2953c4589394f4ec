//! End-to-end multi-repository synchronization
//!
//! Two repositories mount a third peer ("origin") under the `origin/`
//! prefix, encrypted with a shared secret, and exchange a commit through it.

use std::sync::Arc;

use tempfile::TempDir;

use branchsync_core::net::{
    open_all, AskTransport, BlobServer, CellServer, MemNetwork, Service, SpaceServer,
};
use branchsync_core::{
    Cell, MemSpace, Params, PeerId, Repo, RepoConfig, Space, SpaceLayerSpec, SpaceSpec, SyncError,
};

const ORIGIN: PeerId = PeerId([0x0A; 32]);

fn start_origin(network: &MemNetwork) {
    let space: Arc<dyn Space> = Arc::new(MemSpace::new());
    let endpoint = network.endpoint(ORIGIN);
    endpoint.serve(Service::Space, Arc::new(SpaceServer::new(open_all(space.clone()))));
    endpoint.serve(Service::Cell, Arc::new(CellServer::new(open_all(space.clone()))));
    endpoint.serve(Service::Blob, Arc::new(BlobServer::new(open_all(space))));
}

async fn open_repo_with_origin(
    network: &MemNetwork,
    local_peer: PeerId,
    secret: [u8; 32],
) -> (Repo, TempDir) {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("repo");
    Repo::init(&dir).await.unwrap();

    let mut config = RepoConfig::load(&dir).unwrap();
    config.spaces.push(SpaceLayerSpec {
        prefix: "origin/".to_string(),
        target: SpaceSpec::Crypto {
            inner: Box::new(SpaceSpec::Peer { peer: ORIGIN }),
            secret: secret.to_vec(),
        },
    });
    config.save(&dir).unwrap();

    let transport: Arc<dyn AskTransport> = Arc::new(network.endpoint(local_peer));
    let repo = Repo::open_with_transport(&dir, transport).await.unwrap();
    (repo, temp)
}

async fn list_branches(repo: &Repo) -> Vec<String> {
    let mut names = Vec::new();
    repo.for_each_branch(&mut |name| {
        names.push(name.to_string());
        Ok(())
    })
    .await
    .unwrap();
    names
}

#[tokio::test]
async fn multi_repo_sync() {
    let network = MemNetwork::new();
    start_origin(&network);
    let secret = [0x5E; 32];

    let (r1, _t1) =
        open_repo_with_origin(&network, PeerId::from_bytes([0x01; 32]), secret).await;
    let (r2, _t2) =
        open_repo_with_origin(&network, PeerId::from_bytes([0x02; 32]), secret).await;

    // Branches created by r1 on the origin are visible to r2.
    r1.create_branch("origin/master", Params::default())
        .await
        .unwrap();
    r1.create_branch("origin/mybranch", Params::default())
        .await
        .unwrap();

    let seen = list_branches(&r2).await;
    assert!(seen.contains(&"origin/master".to_string()));
    assert!(seen.contains(&"origin/mybranch".to_string()));

    // r1 commits a file and pushes it through the origin.
    let test_data = b"hello world\n";
    r1.add("myfile.txt", test_data).await.unwrap();
    r1.commit("add myfile").await.unwrap();
    r1.sync("master", "origin/master", false).await.unwrap();

    // r2 pulls it back out and reads identical bytes.
    r2.sync("origin/master", "master", false).await.unwrap();
    let names: Vec<String> = r2
        .ls("")
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert!(names.contains(&"myfile.txt".to_string()));
    assert_eq!(r2.cat("", "myfile.txt").await.unwrap(), test_data);
}

#[tokio::test]
async fn sync_is_idempotent_and_fast_forward_only() {
    let network = MemNetwork::new();
    start_origin(&network);
    let secret = [0x5E; 32];

    let (r1, _t1) =
        open_repo_with_origin(&network, PeerId::from_bytes([0x01; 32]), secret).await;
    let (r2, _t2) =
        open_repo_with_origin(&network, PeerId::from_bytes([0x02; 32]), secret).await;

    r1.create_branch("origin/master", Params::default())
        .await
        .unwrap();
    r1.add("shared.txt", b"v1").await.unwrap();
    r1.commit("v1").await.unwrap();
    r1.sync("master", "origin/master", false).await.unwrap();

    // Re-running a successful sync changes nothing and succeeds trivially.
    r1.sync("master", "origin/master", false).await.unwrap();

    // r2 diverges locally, then must not overwrite origin without force.
    r2.add("other.txt", b"unrelated").await.unwrap();
    r2.commit("diverged").await.unwrap();
    let err = r2.sync("master", "origin/master", false).await.unwrap_err();
    assert!(matches!(err, SyncError::NotFastForward));

    // Forcing overwrites; the origin now carries r2's head.
    r2.sync("master", "origin/master", true).await.unwrap();
    r1.sync("origin/master", "master", true).await.unwrap();
    assert_eq!(r1.cat("", "other.txt").await.unwrap(), b"unrelated");
}

#[tokio::test]
async fn origin_stores_only_ciphertext_heads() {
    let network = MemNetwork::new();

    // Keep a handle on the origin's raw space to inspect what it stores.
    let origin_space = Arc::new(MemSpace::new());
    {
        let space: Arc<dyn Space> = origin_space.clone();
        let endpoint = network.endpoint(ORIGIN);
        endpoint.serve(Service::Space, Arc::new(SpaceServer::new(open_all(space.clone()))));
        endpoint.serve(Service::Cell, Arc::new(CellServer::new(open_all(space.clone()))));
        endpoint.serve(Service::Blob, Arc::new(BlobServer::new(open_all(space))));
    }

    let secret = [0x77; 32];
    let (r1, _t1) =
        open_repo_with_origin(&network, PeerId::from_bytes([0x01; 32]), secret).await;

    r1.create_branch("origin/master", Params::default())
        .await
        .unwrap();
    r1.add("secret.txt", b"plaintext payload").await.unwrap();
    r1.commit("sensitive").await.unwrap();
    r1.sync("master", "origin/master", false).await.unwrap();

    // The origin's view of the head cell must not decode as a head.
    let hosted = origin_space.get("master").await.unwrap();
    let sealed = hosted.volume.cell.read().await.unwrap();
    assert!(!sealed.is_empty());
    assert!(branchsync_core::branch::decode_head(&sealed).is_err());

    // A reader with the wrong secret fails closed.
    let (r3, _t3) =
        open_repo_with_origin(&network, PeerId::from_bytes([0x03; 32]), [0x88; 32]).await;
    let err = r3.sync("origin/master", "master", false).await.unwrap_err();
    assert!(matches!(err, SyncError::Crypto(_)));
}

#[tokio::test]
async fn fork_preserves_history_at_the_fork_point() {
    let temp = TempDir::new().unwrap();
    let repo = Repo::init(temp.path().join("repo")).await.unwrap();

    repo.add("a.txt", b"first").await.unwrap();
    repo.commit("first").await.unwrap();
    repo.add("b.txt", b"second").await.unwrap();
    repo.commit("second").await.unwrap();

    repo.fork("master", "feature").await.unwrap();

    let mut master = Vec::new();
    repo.history("master", |id, _| {
        master.push(id);
        Ok(())
    })
    .await
    .unwrap();

    let mut feature = Vec::new();
    repo.history("feature", |id, _| {
        feature.push(id);
        Ok(())
    })
    .await
    .unwrap();

    assert_eq!(master, feature);
    assert_eq!(master.len(), 2);

    let (active, _) = repo.get_active_branch().await.unwrap();
    assert_eq!(active, "feature");
}

#[tokio::test]
async fn staged_changes_gate_branch_switching() {
    let temp = TempDir::new().unwrap();
    let repo = Repo::init(temp.path().join("repo")).await.unwrap();

    repo.create_branch("plain", Params::default()).await.unwrap();
    repo.create_branch(
        "other-domain",
        Params {
            salt: vec![1, 2, 3, 4],
            ..Default::default()
        },
    )
    .await
    .unwrap();

    repo.add("wip.txt", b"work in progress").await.unwrap();

    let err = repo.set_active_branch("other-domain").await.unwrap_err();
    assert!(matches!(err, SyncError::SaltMismatch));

    // Same salt: the switch succeeds and staging survives.
    repo.set_active_branch("plain").await.unwrap();
    assert!(!repo.staging_is_empty().unwrap());
    assert_eq!(repo.status().unwrap().len(), 1);
}
