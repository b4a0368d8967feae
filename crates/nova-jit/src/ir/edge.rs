use super::ids::BlockId;

/// `spec.md` §3: "Pair of block pointers (src, dst), appearing in both blocks' edge lists." The
/// invariant `edge_symmetry` (`spec.md` §8) requires that for every edge registered in `src`'s
/// outgoing list, the *same* `EdgeId` appears in `dst`'s incoming list — never a duplicate edge
/// object, so the mirrored lists can never drift apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub src: BlockId,
    pub dst: BlockId,
}
