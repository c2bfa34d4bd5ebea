//! Scan-for-lowest-set-bit intrinsic and its constant-folding rule.
//!
//! A [`BitScanForwardNode`] whose operand is a compile-time constant is
//! replaced by an `Int` literal holding the scan result. Any other node is
//! left as is and lowered to a single machine instruction by a
//! [`BitScanLowering`] back end.
//!
//! # Example
//!
//! ```text
//! Before: BitScanForward(Long 0x50)
//! After:  Int 4
//! ```

// ─── Scan ────────────────────────────────────────────────────────────

/// Index of the lowest set bit of `value`, or -1 if `value` is zero.
pub fn scan_forward(value: u64) -> i32 {
    if value == 0 {
        return -1;
    }
    i32::try_from(value.trailing_zeros()).unwrap_or(-1)
}

/// Scan a 32-bit operand. Only the low 32 bits are scanned: the operand is
/// zero-extended, never sign-extended.
pub fn scan_forward_int(value: i32) -> i32 {
    scan_forward(u64::from(u32::from_ne_bytes(value.to_ne_bytes())))
}

/// Scan a 64-bit operand.
pub fn scan_forward_long(value: i64) -> i32 {
    scan_forward(u64::from_ne_bytes(value.to_ne_bytes()))
}

// ─── Nodes ───────────────────────────────────────────────────────────

/// Integer kinds a scan operand can have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntKind {
    Int,
    Long,
}

impl IntKind {
    pub fn bits(self) -> u32 {
        match self {
            Self::Int => 32,
            Self::Long => 64,
        }
    }
}

/// Compile-time integer constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Constant {
    Int(i32),
    Long(i64),
}

impl Constant {
    pub fn kind(self) -> IntKind {
        match self {
            Self::Int(_) => IntKind::Int,
            Self::Long(_) => IntKind::Long,
        }
    }

    fn scan(self) -> i32 {
        match self {
            Self::Int(v) => scan_forward_int(v),
            Self::Long(v) => scan_forward_long(v),
        }
    }
}

/// Declared value range of a node's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegerStamp {
    pub kind: IntKind,
    pub lower: i64,
    pub upper: i64,
}

/// Virtual register / value location assigned by the back end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Operand(pub u32);

/// Input of a scan node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueNode {
    Constant(Constant),
    /// A value only known at run time.
    Value { operand: Operand, kind: IntKind },
}

impl ValueNode {
    pub fn kind(self) -> IntKind {
        match self {
            Self::Constant(c) => c.kind(),
            Self::Value { kind, .. } => kind,
        }
    }
}

/// Back-end collaborator that emits the machine instruction for a scan.
pub trait BitScanLowering {
    /// Emit a bit-scan-forward of `operand` and return the result location.
    fn lower_bit_scan_forward(&mut self, operand: Operand) -> Operand;
}

/// Result of canonicalizing a [`BitScanForwardNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Canonical {
    /// The node folded to a literal.
    Literal(Constant),
    Unchanged(BitScanForwardNode),
}

/// Index of the lowest set bit of an `Int` or `Long` value.
///
/// The result is always an `Int`, whatever the operand width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitScanForwardNode {
    value: ValueNode,
}

impl BitScanForwardNode {
    pub fn new(value: ValueNode) -> Self {
        Self { value }
    }

    pub fn value(&self) -> ValueNode {
        self.value
    }

    /// `Int` stamp in `[0, bits)` of the operand kind.
    pub fn stamp(&self) -> IntegerStamp {
        IntegerStamp {
            kind: IntKind::Int,
            lower: 0,
            upper: i64::from(self.value.kind().bits().saturating_sub(1)),
        }
    }

    /// Fold a constant operand into an `Int` literal.
    pub fn canonical(&self) -> Canonical {
        match self.value {
            ValueNode::Constant(c) => Canonical::Literal(Constant::Int(c.scan())),
            ValueNode::Value { .. } => Canonical::Unchanged(*self),
        }
    }

    /// Lower the node through `lowering`. Returns `None` for a constant
    /// operand, which must be folded by [`Self::canonical`] instead.
    pub fn generate<L: BitScanLowering>(&self, lowering: &mut L) -> Option<Operand> {
        match self.value {
            ValueNode::Value { operand, .. } => Some(lowering.lower_bit_scan_forward(operand)),
            ValueNode::Constant(_) => None,
        }
    }
}

// ─── Pass ────────────────────────────────────────────────────────────

/// Statistics from a single folding pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FoldStats {
    pub nodes_visited: usize,
    pub nodes_folded: usize,
}

/// Canonicalize every node, folding those with constant operands.
pub fn fold_bit_scans(nodes: &[BitScanForwardNode]) -> (Vec<Canonical>, FoldStats) {
    let mut stats = FoldStats::default();
    let folded = nodes
        .iter()
        .map(|node| {
            stats.nodes_visited = stats.nodes_visited.saturating_add(1);
            let canonical = node.canonical();
            if matches!(canonical, Canonical::Literal(_)) {
                stats.nodes_folded = stats.nodes_folded.saturating_add(1);
            }
            canonical
        })
        .collect();
    (folded, stats)
}
