//! Property tests over random sequences of group operations.
//!
//! These tests verify critical invariants:
//! - After every operation all remaining members agree on the epoch
//! - Application messages reach every other member intact
//! - Larger groups keep working across commits from arbitrary leaves

mod common;

use arbor_core::{ClientState, CommitOptions, GroupStatus, KeyPackageBundle, LeafIndex};
use arbor_proto::{Proposal, Remove};
use common::{World, application_data, assert_agree};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Add,
    Remove(usize),
    Commit(usize),
    Send(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Add),
        any::<usize>().prop_map(Op::Remove),
        any::<usize>().prop_map(Op::Commit),
        any::<usize>().prop_map(Op::Send),
    ]
}

/// Every live member's state, in join order.
struct Group {
    world: World,
    members: Vec<ClientState>,
    pending: Vec<KeyPackageBundle>,
    joined: usize,
}

impl Group {
    fn new(seed: u64) -> Self {
        let world = World::new(seed);
        let founder = world.create_group(b"proptest", "member0");
        Self { world, members: vec![founder], pending: Vec::new(), joined: 1 }
    }

    fn broadcast_commit(&mut self, committer: usize, options: CommitOptions) {
        let (next, output) =
            self.world.commit(&self.members[committer], options).expect("commit should succeed");
        let mut members = Vec::with_capacity(self.members.len() + 1);
        for (i, member) in self.members.iter().enumerate() {
            if i == committer {
                members.push(next.clone());
                continue;
            }
            let (state, _) = self.world.deliver(member, &output.commit);
            if state.status() != GroupStatus::RemovedFromGroup {
                members.push(state);
            }
        }
        if let Some(welcome) = output.welcome {
            for bundle in self.pending.drain(..) {
                let joiner = ClientState::join_group(&self.world.ctx(), &welcome, &bundle, None)
                    .expect("joining from the Welcome should succeed");
                members.push(joiner);
            }
        }
        self.members = members;
    }

    fn apply(&mut self, op: &Op) {
        let len = self.members.len();
        match op {
            Op::Add => {
                let bundle = self.world.bundle(&format!("member{}", self.joined));
                self.joined += 1;
                let proposal = Proposal::Add(arbor_proto::Add { key_package: bundle.key_package.clone() });
                self.pending.push(bundle);
                self.broadcast_commit(0, CommitOptions { proposals: vec![proposal], ..CommitOptions::default() });
            },
            Op::Remove(k) if len > 1 => {
                let target = self.members[1 + k % (len - 1)].own_leaf();
                let proposal = Proposal::Remove(Remove { removed: target.0 });
                self.broadcast_commit(0, CommitOptions { proposals: vec![proposal], ..CommitOptions::default() });
            },
            Op::Remove(_) => {},
            Op::Commit(k) => self.broadcast_commit(k % len, CommitOptions::default()),
            Op::Send(k) => {
                let sender = k % len;
                let payload = format!("from {sender} in epoch {}", self.members[sender].epoch());
                let (next, message) = self.world.send(&self.members[sender], payload.as_bytes());
                for (i, member) in self.members.iter_mut().enumerate() {
                    if i == sender {
                        continue;
                    }
                    let (state, processed) = self.world.deliver(member, &message);
                    assert_eq!(application_data(&processed), payload.as_bytes());
                    *member = state;
                }
                self.members[sender] = next;
            },
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    /// INVARIANT: Any sequence of adds, removes, commits and messages leaves
    /// every remaining member in agreement.
    #[test]
    fn members_stay_in_agreement(seed in any::<u64>(), ops in prop::collection::vec(op(), 1..8)) {
        let mut group = Group::new(seed);
        for op in &ops {
            group.apply(op);
            assert_agree(&group.members.iter().collect::<Vec<_>>());
        }
    }
}

/// INVARIANT: A sixteen member group follows commits from every position in
/// the tree.
#[test]
fn large_group_rotates_committers() {
    let mut group = Group::new(30);
    for _ in 0..15 {
        let bundle = group.world.bundle(&format!("member{}", group.joined));
        group.joined += 1;
        group.pending.push(bundle);
    }
    let proposals = group
        .pending
        .iter()
        .map(|bundle| Proposal::Add(arbor_proto::Add { key_package: bundle.key_package.clone() }))
        .collect();
    group.broadcast_commit(0, CommitOptions { proposals, ..CommitOptions::default() });
    assert_eq!(group.members.len(), 16);
    assert_eq!(group.members[15].own_leaf(), LeafIndex(15));

    for committer in [15, 7, 8, 3] {
        group.broadcast_commit(committer, CommitOptions::default());
        assert_agree(&group.members.iter().collect::<Vec<_>>());
    }
    assert_eq!(group.members[0].epoch(), 5);
    assert_eq!(group.members[0].tree().leaf_count(), 16);
}
