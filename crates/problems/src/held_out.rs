//! Deterministic held-out problems.
//!
//! Problem `i` always comes from generator `i % 7`, and every generator draws
//! from the same seeded RNG, so a given `(n, seed)` yields byte-identical
//! problems on every run. The categories never appear in training.

use mathprompt_core::{Category, Problem};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// Seed used for the held-out set unless configured otherwise.
pub const DEFAULT_TEST_SEED: u64 = 42;

/// Attempts at a valid nested expression before using the canned one.
const NESTED_ATTEMPTS: usize = 20;

/// Generate the held-out set with [`DEFAULT_TEST_SEED`].
pub fn generate_test_problems(n: usize) -> Vec<Problem> {
    generate_test_problems_seeded(n, DEFAULT_TEST_SEED)
}

/// Generate `n` held-out problems from `seed`.
pub fn generate_test_problems_seeded(n: usize, seed: u64) -> Vec<Problem> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let category = Category::HELD_OUT[i % Category::HELD_OUT.len()];
            let (question, answer) = match category {
                Category::Exponents => exponent(&mut rng),
                Category::Modulo => modulo(&mut rng),
                Category::LongChain => long_chain(&mut rng),
                Category::DeeplyNested => deeply_nested(&mut rng),
                Category::Negatives => negatives(&mut rng),
                Category::Decimals => decimals(&mut rng),
                _ => large_numbers(&mut rng),
            };
            Problem::with_category(question, answer, category)
        })
        .collect()
}

fn exponent(rng: &mut StdRng) -> (String, f64) {
    let base: i64 = rng.gen_range(2..=12);
    let exp: u32 = if base > 9 { 2 } else { rng.gen_range(2..=4) };
    (format!("{}^{}", base, exp), base.pow(exp) as f64)
}

fn modulo(rng: &mut StdRng) -> (String, f64) {
    let a: i64 = rng.gen_range(10..=500);
    let b: i64 = rng.gen_range(2..=19);
    (format!("{} % {}", a, b), (a % b) as f64)
}

fn long_chain(rng: &mut StdRng) -> (String, f64) {
    let terms = rng.gen_range(5..=10);
    let subtract = rng.gen_bool(0.5);
    let symbol = if subtract { " - " } else { " + " };

    let values: Vec<i64> = (0..terms).map(|_| rng.gen_range(1..=99)).collect();
    let answer = values[1..]
        .iter()
        .fold(values[0], |acc, v| if subtract { acc - v } else { acc + v });
    let text = values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(symbol);
    (text, answer as f64)
}

fn apply(op: char, left: i64, right: i64) -> Option<i64> {
    match op {
        '+' => Some(left + right),
        '-' => Some(left - right),
        '*' => Some(left * right),
        '/' if right != 0 && left % right == 0 => Some(left / right),
        _ => None,
    }
}

/// Shape: `((a o b) o (c o d)) o e`.
fn deeply_nested(rng: &mut StdRng) -> (String, f64) {
    const OPS: [char; 4] = ['+', '-', '*', '/'];

    for attempt in 0..NESTED_ATTEMPTS {
        let n: Vec<i64> = (0..5).map(|_| rng.gen_range(1..=20)).collect();
        let o: Vec<char> = (0..4).map(|_| *OPS.choose(rng).unwrap_or(&'+')).collect();

        let value = apply(o[0], n[0], n[1])
            .zip(apply(o[2], n[2], n[3]))
            .and_then(|(left, right)| apply(o[1], left, right))
            .and_then(|inner| apply(o[3], inner, n[4]))
            .filter(|v| v.abs() < 100_000);

        if let Some(value) = value {
            let text = format!(
                "(({} {} {}) {} ({} {} {})) {} {}",
                n[0], o[0], n[1], o[1], n[2], o[2], n[3], o[3], n[4]
            );
            return (text, value as f64);
        }
        debug!("nested expression attempt {} rejected", attempt + 1);
    }

    ("((2 + 3) * (4 - 1)) - 5".to_string(), 10.0)
}

fn negatives(rng: &mut StdRng) -> (String, f64) {
    const OPS: [char; 3] = ['+', '-', '*'];

    let a: i64 = rng.gen_range(-50..=-1);
    let mut b: i64 = rng.gen_range(-50..=49);
    if b >= 0 {
        b += 1;
    }
    let op = *OPS.choose(rng).unwrap_or(&'+');
    let answer = apply(op, a, b).unwrap_or_default();
    let right = if b < 0 { format!("({})", b) } else { b.to_string() };
    (format!("{} {} {}", a, op, right), answer as f64)
}

/// Operands are multiples of 0.25 that are never whole numbers.
fn decimals(rng: &mut StdRng) -> (String, f64) {
    let mut quarter = || {
        let k: u32 = rng.gen_range(1..=40);
        let k = if k % 4 == 0 { k + 1 } else { k };
        k as f64 / 4.0
    };
    let a = quarter();
    let b = quarter();
    if rng.gen_bool(0.5) {
        (format!("{} + {}", a, b), a + b)
    } else {
        (format!("{} - {}", a, b), a - b)
    }
}

fn large_numbers(rng: &mut StdRng) -> (String, f64) {
    const OPS: [char; 3] = ['+', '-', '*'];

    let a: i64 = rng.gen_range(1000..=9999);
    let b: i64 = rng.gen_range(1000..=9999);
    let op = *OPS.choose(rng).unwrap_or(&'+');
    let answer = apply(op, a, b).unwrap_or_default();
    (format!("{} {} {}", a, op, b), answer as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::eval_expression;

    #[test]
    fn test_same_seed_same_problems() {
        let first = generate_test_problems(70);
        let second = generate_test_problems(70);
        assert_eq!(first, second);
    }

    #[test]
    fn test_different_seed_differs() {
        let a = generate_test_problems_seeded(40, 1);
        let b = generate_test_problems_seeded(40, 2);
        assert_ne!(a, b);
    }

    #[test]
    fn test_prefix_is_stable() {
        // The first problems do not depend on how many are requested.
        let short = generate_test_problems(10);
        let long = generate_test_problems(40);
        assert_eq!(short[..], long[..10]);
    }

    #[test]
    fn test_categories_cycle() {
        let problems = generate_test_problems(21);
        for (i, problem) in problems.iter().enumerate() {
            assert_eq!(problem.category, Category::HELD_OUT[i % 7]);
        }
        assert!(problems.iter().all(|p| p.category != Category::Arithmetic));
    }

    #[test]
    fn test_answers_match_expression_text() {
        for problem in generate_test_problems_seeded(700, 9) {
            let value = eval_expression(&problem.question)
                .unwrap_or_else(|e| panic!("{}: {}", problem.question, e));
            assert_eq!(value, problem.answer, "{} ({})", problem.question, problem.category);
        }
    }

    #[test]
    fn test_divisions_in_nested_problems_are_exact() {
        for problem in generate_test_problems_seeded(700, 13) {
            if problem.category == Category::DeeplyNested {
                assert_eq!(problem.answer.fract(), 0.0, "{}", problem.question);
            }
        }
    }

    #[test]
    fn test_decimal_operands_have_fractions() {
        for problem in generate_test_problems_seeded(140, 4) {
            if problem.category == Category::Decimals {
                assert!(problem.question.contains('.'), "{}", problem.question);
            }
        }
    }

    #[test]
    fn test_long_chain_term_count() {
        for problem in generate_test_problems_seeded(140, 5) {
            if problem.category == Category::LongChain {
                let terms = problem.question.split(|c| c == '+' || c == '-').count();
                assert!((5..=10).contains(&terms), "{}", problem.question);
            }
        }
    }

    #[test]
    fn test_large_number_operands() {
        for problem in generate_test_problems_seeded(140, 6) {
            if problem.category == Category::LargeNumbers {
                let operands: Vec<&str> = problem.question.split(' ').step_by(2).collect();
                assert!(operands.iter().all(|o| o.len() == 4), "{}", problem.question);
            }
        }
    }
}
