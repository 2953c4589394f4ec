//! Property-based tests for the cell and the enumeration contract
//!
//! Uses proptest to verify the linearizable-CAS property of cells and the
//! exactness of paginated enumeration under arbitrary name sets and page
//! sizes.

use std::collections::BTreeSet;
use std::sync::Arc;

use proptest::prelude::*;

use branchsync_core::net::{open_all, MemNetwork, RemoteSpace, Service, SpaceServer};
use branchsync_core::space::collect_names;
use branchsync_core::{apply, Cell, MemCell, MemSpace, Params, PeerId, Space, Span};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("build runtime")
}

/// Branch-name strategy: short lowercase names, possibly with separators
fn name_set_strategy() -> impl Strategy<Value = BTreeSet<String>> {
    prop::collection::btree_set("[a-z]{1,6}(/[a-z]{1,4})?", 0..40)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Concurrent counters through `apply` never lose an update.
    #[test]
    fn concurrent_applies_serialize(writers in 1usize..6, per_writer in 1usize..20) {
        runtime().block_on(async move {
            let cell = Arc::new(MemCell::new());
            let mut handles = Vec::new();
            for _ in 0..writers {
                let cell = cell.clone();
                handles.push(tokio::spawn(async move {
                    for _ in 0..per_writer {
                        apply(cell.as_ref(), |cur| {
                            let n: u64 = if cur.is_empty() {
                                0
                            } else {
                                String::from_utf8_lossy(cur).parse().unwrap()
                            };
                            Ok((n + 1).to_string().into_bytes())
                        })
                        .await
                        .unwrap();
                    }
                }));
            }
            for handle in handles {
                handle.await.unwrap();
            }
            let value = cell.read().await.unwrap();
            let total: u64 = String::from_utf8(value).unwrap().parse().unwrap();
            assert_eq!(total, (writers * per_writer) as u64);
        });
    }

    /// Remote enumeration returns exactly the branch names, ascending,
    /// duplicate-free, for any page size.
    #[test]
    fn pagination_is_exact(names in name_set_strategy(), page_size in 1usize..9) {
        runtime().block_on(async move {
            let network = MemNetwork::new();
            let server_id = PeerId::from_bytes([1u8; 32]);

            let space = Arc::new(MemSpace::new());
            for name in &names {
                space.create(name, Params::default()).await.unwrap();
            }
            let shared: Arc<dyn Space> = space;
            network
                .endpoint(server_id)
                .serve(Service::Space, Arc::new(SpaceServer::new(open_all(shared))));

            let transport = Arc::new(network.endpoint(PeerId::from_bytes([2u8; 32])));
            let remote = RemoteSpace::with_page_size(transport, server_id, page_size);

            let listed = collect_names(&remote, Span::all()).await.unwrap();
            let expected: Vec<String> = names.iter().cloned().collect();
            assert_eq!(listed, expected);
        });
    }

    /// Spanned enumeration yields exactly the names inside the half-open span.
    #[test]
    fn pagination_respects_spans(
        names in name_set_strategy(),
        begin in "[a-z]{0,3}",
        end in "[a-z]{0,3}",
    ) {
        runtime().block_on(async move {
            let network = MemNetwork::new();
            let server_id = PeerId::from_bytes([1u8; 32]);

            let space = Arc::new(MemSpace::new());
            for name in &names {
                space.create(name, Params::default()).await.unwrap();
            }
            let shared: Arc<dyn Space> = space;
            network
                .endpoint(server_id)
                .serve(Service::Space, Arc::new(SpaceServer::new(open_all(shared))));

            let transport = Arc::new(network.endpoint(PeerId::from_bytes([2u8; 32])));
            let remote = RemoteSpace::with_page_size(transport, server_id, 4);

            let span = Span {
                begin: begin.clone(),
                end: if end.is_empty() { None } else { Some(end.clone()) },
            };
            let listed = collect_names(&remote, span.clone()).await.unwrap();
            let expected: Vec<String> = names
                .iter()
                .filter(|n| span.contains(n))
                .cloned()
                .collect();
            assert_eq!(listed, expected);
        });
    }
}
