//! Gossip Disseminator
//!
//! Every round pushes the full table to a handful of Alive peers chosen
//! uniformly without replacement. There is no ack and no retry: convergence
//! comes from repeating the round.

use rand::Rng;
use rand::seq::IteratorRandom;
use std::collections::BTreeSet;

use super::protocol::Message;
use super::types::{NodeId, TableSnapshot};

/// Chooses at most `fanout` distinct peers, never `local`.
pub fn select_targets<R: Rng + ?Sized>(
    peers: &BTreeSet<NodeId>,
    local: &NodeId,
    fanout: usize,
    rng: &mut R,
) -> Vec<NodeId> {
    peers
        .iter()
        .filter(|peer| *peer != local)
        .cloned()
        .choose_multiple(rng, fanout)
}

pub fn gossip_message(table: TableSnapshot) -> Message {
    Message::Gossip { table }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashSet;

    fn id(port: u16) -> NodeId {
        NodeId(format!("127.0.0.1:{}", port))
    }

    #[test]
    fn test_fanout_is_bounded_and_distinct() {
        let mut rng = StdRng::seed_from_u64(42);
        let local = id(7000);
        let peers: BTreeSet<NodeId> = (7001..7010).map(id).collect();

        for _ in 0..100 {
            let targets = select_targets(&peers, &local, 3, &mut rng);
            let unique: HashSet<_> = targets.iter().collect();

            assert_eq!(targets.len(), 3);
            assert_eq!(unique.len(), 3);
            assert!(targets.iter().all(|target| peers.contains(target)));
        }
    }

    #[test]
    fn test_small_cluster_gets_everyone() {
        let mut rng = StdRng::seed_from_u64(1);
        let local = id(7000);
        let peers: BTreeSet<NodeId> = [id(7001), id(7002)].into_iter().collect();

        let mut targets = select_targets(&peers, &local, 3, &mut rng);
        targets.sort();

        assert_eq!(targets, vec![id(7001), id(7002)]);
    }

    #[test]
    fn test_never_selects_self() {
        let mut rng = StdRng::seed_from_u64(3);
        let local = id(7000);
        let peers: BTreeSet<NodeId> = [id(7000), id(7001)].into_iter().collect();

        for _ in 0..20 {
            assert_eq!(select_targets(&peers, &local, 3, &mut rng), vec![id(7001)]);
        }
    }

    #[test]
    fn test_no_peers_no_targets() {
        let mut rng = StdRng::seed_from_u64(3);

        assert!(select_targets(&BTreeSet::new(), &id(7000), 3, &mut rng).is_empty());
    }
}
