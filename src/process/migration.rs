//! Listener migration between configuration generations.
//!
//! Pools are matched by listen address, not by name: a renamed pool keeps its
//! socket. A source pool without a match keeps its socket and loses it when its
//! context is destroyed.
//!
//! If several destination pools share a source's address, the last one in
//! configuration order receives the socket (logged as a warning).

use crate::observability::metrics;
use crate::process::context::Context;

/// One socket handed over: source pool index to destination pool index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerMove {
    pub from: usize,
    pub to: usize,
}

/// Outcome of one `migrate_listeners` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Sockets moved from `src` to `dst`.
    pub migrated: usize,
    /// Moves where the pool name changed.
    pub renamed: usize,
    /// Matches skipped because the destination already owned a socket.
    pub conflicts: usize,
    /// Every move performed, in source order.
    pub moves: Vec<ListenerMove>,
}

/// Move every listening socket in `src` whose address also exists in `dst`.
///
/// # Panics
/// If either context has no pools.
pub fn migrate_listeners(dst: &mut Context, src: &mut Context) -> MigrationReport {
    let report = move_listeners(dst, src);
    metrics::record_migration(report.migrated, report.conflicts);
    report
}

/// `migrate_listeners` without metrics, for callers that may still undo the
/// moves with `return_listeners`.
pub(crate) fn move_listeners(dst: &mut Context, src: &mut Context) -> MigrationReport {
    assert!(!src.pools().is_empty(), "source context has no pools");
    assert!(!dst.pools().is_empty(), "destination context has no pools");

    let mut report = MigrationReport::default();

    for (from, src_pool) in src.pools_mut().iter_mut().enumerate() {
        let mut matches = dst
            .pools()
            .iter()
            .enumerate()
            .filter(|(_, p)| p.addrstr() == src_pool.addrstr())
            .map(|(i, _)| i);

        let Some(first) = matches.next() else {
            continue;
        };
        let target = match matches.last() {
            Some(last) => {
                tracing::warn!(
                    address = %src_pool.addrstr(),
                    "Several pools share one listen address; the last one inherits the socket"
                );
                last
            }
            None => first,
        };

        let dst_pool = &mut dst.pools_mut()[target];

        if dst_pool.name() != src_pool.name() {
            tracing::info!(
                from = %src_pool.name(),
                to = %dst_pool.name(),
                "Listening socket's pool renamed"
            );
        }

        if dst_pool.has_listener() {
            tracing::error!(pool = %dst_pool.name(), "Pool already has a listener, not migrating");
            report.conflicts += 1;
            continue;
        }

        let Some(resource) = src_pool.take_listener() else {
            continue;
        };

        tracing::info!(
            pool = %src_pool.name(),
            address = %src_pool.addrstr(),
            "Migrating listener"
        );
        if let Err(resource) = dst_pool.install_listener(resource) {
            // has_listener() was false above
            let _ = src_pool.install_listener(resource);
            continue;
        }

        report.migrated += 1;
        report.moves.push(ListenerMove { from, to: target });
        if dst_pool.name() != src_pool.name() {
            report.renamed += 1;
        }
    }

    report
}

/// Undo `moves` made from `src` into `dst`: every socket goes back to the
/// exact source pool it came from. Returns how many were returned.
pub(crate) fn return_listeners(src: &mut Context, dst: &mut Context, moves: &[ListenerMove]) -> usize {
    let mut returned = 0;
    for mv in moves {
        let Some(resource) = dst.pools_mut().get_mut(mv.to).and_then(|p| p.take_listener()) else {
            continue;
        };
        let Some(src_pool) = src.pools_mut().get_mut(mv.from) else {
            continue;
        };
        match src_pool.install_listener(resource) {
            Ok(()) => returned += 1,
            Err(resource) => tracing::error!(
                pool = %src_pool.name(),
                address = %resource.local_addr(),
                "Pool regained a listener before rollback, closing the returned one"
            ),
        }
    }
    returned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PoolConfig, ProxyConfig};
    use std::os::fd::AsRawFd;
    use std::sync::Arc;

    fn context(pools: &[(&str, &str)]) -> Context {
        let config = ProxyConfig {
            pools: pools.iter().map(|(n, a)| PoolConfig::new(*n, *a)).collect(),
            ..ProxyConfig::default()
        };
        Context::from_config(Arc::new(config))
    }

    /// Pools listen on port 0 of distinct loopback addresses so each address string is unique.
    fn bound_context(pools: &[(&str, &str)]) -> Context {
        let mut ctx = context(pools);
        ctx.bind_listeners().unwrap();
        ctx
    }

    #[test]
    fn moves_socket_to_matching_pool() {
        let mut src = bound_context(&[("cache", "127.0.0.1:0")]);
        let addr = src.pools()[0].addrstr().to_string();
        let fd = src.pools()[0].listener().unwrap().as_raw_fd();
        let mut dst = context(&[("cache", &addr)]);

        let report = migrate_listeners(&mut dst, &mut src);

        assert_eq!(report.migrated, 1);
        assert!(!src.pools()[0].has_listener());
        let moved = dst.pools()[0].listener().unwrap();
        assert_eq!(moved.as_raw_fd(), fd);
        assert_eq!(moved.owner(), dst.pools()[0].id());
    }

    #[test]
    fn renamed_pool_still_inherits() {
        let mut src = bound_context(&[("cache", "127.0.0.1:0")]);
        let addr = src.pools()[0].addrstr().to_string();
        let mut dst = context(&[("cache-v2", &addr)]);

        let report = migrate_listeners(&mut dst, &mut src);

        assert_eq!(report.migrated, 1);
        assert_eq!(report.renamed, 1);
        assert!(dst.pools()[0].has_listener());
    }

    #[test]
    fn same_name_new_address_does_not_migrate() {
        let mut src = bound_context(&[("cache", "127.0.0.1:0")]);
        let mut dst = context(&[("cache", "127.0.0.3:0")]);

        let report = migrate_listeners(&mut dst, &mut src);

        assert_eq!(report.migrated, 0);
        assert!(src.pools()[0].has_listener());
        assert!(!dst.pools()[0].has_listener());
    }

    #[test]
    fn dropped_pool_keeps_socket_in_source() {
        let mut src = bound_context(&[("cache", "127.0.0.1:0"), ("sessions", "127.0.0.2:0")]);
        let kept = src.pools()[0].addrstr().to_string();
        let mut dst = context(&[("cache", &kept)]);

        migrate_listeners(&mut dst, &mut src);

        assert!(!src.pools()[0].has_listener());
        assert!(src.pools()[1].has_listener());
        src.close_listeners();
        assert_eq!(src.listener_count(), 0);
    }

    #[test]
    fn occupied_destination_is_skipped() {
        let mut src = bound_context(&[("cache", "127.0.0.1:0")]);
        let addr = src.pools()[0].addrstr().to_string();
        let mut dst = context(&[("cache", &addr)]);
        dst.bind_listeners().unwrap();
        let dst_fd = dst.pools()[0].listener().unwrap().as_raw_fd();

        let report = migrate_listeners(&mut dst, &mut src);

        assert_eq!(report.conflicts, 1);
        assert_eq!(report.migrated, 0);
        assert!(src.pools()[0].has_listener());
        assert_eq!(dst.pools()[0].listener().unwrap().as_raw_fd(), dst_fd);
    }

    #[test]
    fn last_of_several_matches_wins() {
        let mut src = bound_context(&[("cache", "127.0.0.1:0")]);
        let addr = src.pools()[0].addrstr().to_string();
        let mut dst = context(&[("a", &addr), ("b", &addr)]);

        let report = migrate_listeners(&mut dst, &mut src);

        assert_eq!(report.migrated, 1);
        assert!(!dst.pools()[0].has_listener());
        assert!(dst.pools()[1].has_listener());
    }

    #[test]
    fn returned_sockets_land_in_their_original_pools() {
        let mut src = context(&[("a", "127.0.0.1:0"), ("b", "127.0.0.1:0")]);
        src.bind_listeners().unwrap();
        let before: Vec<_> = src.pools().iter().map(|p| p.listener().unwrap().as_raw_fd()).collect();
        let mut dst = context(&[("a", "127.0.0.1:0"), ("b", "127.0.0.1:0")]);

        let report = move_listeners(&mut dst, &mut src);
        assert_eq!(report.moves, vec![ListenerMove { from: 0, to: 1 }]);
        assert_eq!(report.conflicts, 1);

        assert_eq!(return_listeners(&mut src, &mut dst, &report.moves), 1);

        let after: Vec<_> = src.pools().iter().map(|p| p.listener().unwrap().as_raw_fd()).collect();
        assert_eq!(after, before);
        assert_eq!(src.pools()[0].listener().unwrap().owner(), src.pools()[0].id());
        assert_eq!(dst.listener_count(), 0);
    }

    #[test]
    #[should_panic(expected = "source context has no pools")]
    fn empty_source_is_a_bug() {
        let mut src = context(&[]);
        let mut dst = context(&[("cache", "127.0.0.1:0")]);
        migrate_listeners(&mut dst, &mut src);
    }
}
