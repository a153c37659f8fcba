//! Random training problems built from expression trees.

use mathprompt_core::Problem;
use rand::seq::SliceRandom;
use rand::Rng;

/// Results outside `(-LIMIT, LIMIT)` are rejected.
const LIMIT: i64 = 1_000_000_000;

/// Maximum tree depth, biased toward shallow expressions.
const DEPTHS: [u32; 5] = [1, 1, 2, 2, 3];

/// Chance that a non-root node becomes a leaf before reaching max depth.
const EARLY_LEAF: f64 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
}

impl Op {
    const ALL: [Op; 4] = [Op::Add, Op::Sub, Op::Mul, Op::Div];
    const NO_DIV: [Op; 3] = [Op::Add, Op::Sub, Op::Mul];

    fn symbol(self) -> &'static str {
        match self {
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Div => "/",
        }
    }

    fn apply(self, left: i64, right: i64) -> Option<i64> {
        match self {
            Op::Add => left.checked_add(right),
            Op::Sub => left.checked_sub(right),
            Op::Mul => left.checked_mul(right),
            Op::Div => left.checked_div(right),
        }
    }
}

#[derive(Debug, Clone)]
struct Expr {
    text: String,
    value: i64,
    /// Operator at the top of this node, `None` for leaves
    op: Option<Op>,
    bracketed: bool,
}

/// Generate `n` random training problems from the thread-local RNG.
pub fn generate_problems(n: usize) -> Vec<Problem> {
    generate_problems_with(&mut rand::thread_rng(), n)
}

/// Generate `n` random training problems from `rng`.
pub fn generate_problems_with<R: Rng + ?Sized>(rng: &mut R, n: usize) -> Vec<Problem> {
    (0..n)
        .map(|_| {
            let max_depth = *DEPTHS.choose(rng).unwrap_or(&1);
            let expr = random_expr(rng, 0, max_depth);
            Problem::new(expr.text, expr.value as f64)
        })
        .collect()
}

fn random_expr<R: Rng + ?Sized>(rng: &mut R, depth: u32, max_depth: u32) -> Expr {
    if depth >= max_depth || (depth > 0 && rng.gen_bool(EARLY_LEAF)) {
        let upper = if depth > 0 { 99 } else { 999 };
        let n: i64 = rng.gen_range(1..=upper);
        return Expr {
            text: n.to_string(),
            value: n,
            op: None,
            bracketed: false,
        };
    }

    let left = random_expr(rng, depth + 1, max_depth);
    let right = random_expr(rng, depth + 1, max_depth);
    let mut op = *Op::ALL.choose(rng).unwrap_or(&Op::Add);

    // Division only when it is exact.
    if op == Op::Div && (right.value == 0 || left.value % right.value != 0) {
        op = *Op::NO_DIV.choose(rng).unwrap_or(&Op::Add);
    }

    let value = match op.apply(left.value, right.value) {
        Some(v) if v > -LIMIT && v < LIMIT => v,
        _ => return left,
    };

    // `a * (b / c)` and `a / (b * c)` must keep their grouping when read
    // left to right.
    let right_text = if matches!(op, Op::Mul | Op::Div) && right.op.is_some() && !right.bracketed {
        format!("({})", right.text)
    } else {
        right.text
    };

    let bracketed = depth > 0 && matches!(op, Op::Add | Op::Sub);
    let text = if bracketed {
        format!("({} {} {})", left.text, op.symbol(), right_text)
    } else {
        format!("{} {} {}", left.text, op.symbol(), right_text)
    };

    Expr {
        text,
        value,
        op: Some(op),
        bracketed,
    }
}
