use kestrel::value::{BinaryOp, DataType, select_result_type};
use kestrel::{Compiler, Environment, Value, Vm, VmConfig};
use proptest::prelude::*;

fn numeric_type() -> impl Strategy<Value = DataType> {
    prop_oneof![
        Just(DataType::Int32),
        Just(DataType::UInt32),
        Just(DataType::Int64),
        Just(DataType::UInt64),
        Just(DataType::Real),
    ]
}

fn operator() -> impl Strategy<Value = BinaryOp> {
    prop_oneof![
        Just(BinaryOp::Add),
        Just(BinaryOp::Sub),
        Just(BinaryOp::Mul),
        Just(BinaryOp::Div),
        Just(BinaryOp::Rem),
        Just(BinaryOp::BitAnd),
        Just(BinaryOp::Lt),
    ]
}

fn run_with(compiler: &Compiler, config: VmConfig, source: &str, args: Vec<Value>) -> Result<Value, i32> {
    let program = compiler.compile(source).unwrap_or_else(|e| panic!("compile failed: {e}\n{source}"));
    let mut vm = Vm::with_config(Environment::standard(), config);
    vm.load(&program).map_err(|e| e.code)?;
    vm.run(args).map_err(|e| e.code)
}

fn run(source: &str, args: Vec<Value>) -> Result<Value, i32> {
    run_with(&Compiler::new(), VmConfig::default(), source, args)
}

const LOOPS: &str = "function classify(n) {
    switch (n % 4) {
        case 0: return \"zero\";
        case 1:
        case 2: return \"low\";
        default: return \"high\";
    }
}

function main(a, b, c) {
    total = 0;
    for (i = 0; i < a; i++) {
        if (i == b) continue;
        if (i > c) break;
        total += i * (i % 3 == 0 ? 2 : 1);
    }
    words = [];
    j = a;
    while (j > 0) {
        words->push(classify(j));
        j -= 1;
    }
    hits = 0;
    foreach (w : words) {
        if (w == \"low\" && !(w == \"zero\") || false) hits++;
    }
    try {
        if (b == 0) x = a / b;
    } catch {
        total = total - $errorcode;
    }
    return total . \":\" . hits . \":\" . words->size;
}";

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn result_type_is_symmetric(l in numeric_type(), r in numeric_type(), op in operator()) {
        prop_assert_eq!(select_result_type(l, r, op), select_result_type(r, l, op));
    }

    #[test]
    fn division_is_always_real(l in numeric_type(), r in numeric_type()) {
        prop_assert_eq!(select_result_type(l, r, BinaryOp::Div), Ok(DataType::Real));
    }

    #[test]
    fn result_type_is_one_of_the_operands_or_signed(l in numeric_type(), r in numeric_type()) {
        let ty = select_result_type(l, r, BinaryOp::Add).unwrap();
        let candidates = [l, r, l.to_signed(), r.to_signed()];
        prop_assert!(candidates.contains(&ty), "{:?} + {:?} gave {:?}", l, r, ty);
    }

    #[test]
    fn int32_addition_wraps(a in any::<i32>(), b in any::<i32>()) {
        let result = run("function main(a, b) { return a + b; }", vec![Value::Int32(a), Value::Int32(b)]);
        prop_assert_eq!(result, Ok(Value::Int32(a.wrapping_add(b))));
    }

    #[test]
    fn mixed_width_addition_widens(a in any::<i32>(), b in any::<i64>()) {
        let result = run("function main(a, b) { return a + b; }", vec![Value::Int32(a), Value::Int64(b)]);
        prop_assert_eq!(result, Ok(Value::Int64(i64::from(a).wrapping_add(b))));
    }

    #[test]
    fn integer_division_by_zero_fails(a in any::<i32>()) {
        let result = run("function main(a) { return a % 0; }", vec![Value::Int32(a)]);
        prop_assert_eq!(result, Err(9));
    }

    #[test]
    fn copies_never_alias(values in prop::collection::vec(-1000i32..1000, 1..8), replacement in -1000i32..1000) {
        let literal = values.iter().map(i32::to_string).collect::<Vec<_>>().join(", ");
        let source = format!(
            "function main(v) {{ a = [{literal}]; b = a; b[0] = v; b->push(v); return a; }}"
        );
        let result = run(&source, vec![Value::Int32(replacement)]).unwrap();
        let Value::Array(array) = result else {
            return Err(TestCaseError::fail("expected an array"));
        };
        let seen: Vec<i64> = array.borrow().values().filter_map(Value::to_integer).collect();
        let expected: Vec<i64> = values.iter().map(|&v| i64::from(v)).collect();
        prop_assert_eq!(seen, expected);
    }

    #[test]
    fn literal_is_not_mutated_across_runs(first in -100i32..100, second in -100i32..100) {
        let compiler = Compiler::new();
        let program = compiler.compile("function main(v) { a = [0, 0]; r = a[1]; a[1] = v; return r; }").unwrap();
        let mut vm = Vm::new(Environment::standard());
        vm.load(&program).unwrap();
        prop_assert_eq!(vm.run(vec![Value::Int32(first)]).unwrap(), Value::Int32(0));
        prop_assert_eq!(vm.run(vec![Value::Int32(second)]).unwrap(), Value::Int32(0));
    }

    #[test]
    fn optimizer_preserves_results(a in 0i32..20, b in 0i32..20, c in 0i32..20) {
        let args = || vec![Value::Int32(a), Value::Int32(b), Value::Int32(c)];
        let optimized = run_with(&Compiler::new(), VmConfig::default(), LOOPS, args());
        let plain = run_with(&Compiler::new().optimize(false), VmConfig::default(), LOOPS, args());
        prop_assert!(optimized.is_ok(), "{:?}", optimized);
        prop_assert_eq!(optimized, plain);
    }

    #[test]
    fn inline_cache_preserves_results(a in 0i32..20, b in 0i32..20, c in 0i32..20) {
        let args = || vec![Value::Int32(a), Value::Int32(b), Value::Int32(c)];
        let cached = run_with(&Compiler::new(), VmConfig::default(), LOOPS, args());
        let uncached = run_with(
            &Compiler::new(),
            VmConfig { inline_cache: false, ..VmConfig::default() },
            LOOPS,
            args(),
        );
        prop_assert_eq!(cached, uncached);
    }

    #[test]
    fn recursion_keeps_locals_per_call(n in 0i32..40) {
        let source = "function f(n) { x = n; if (n > 0) f(n - 1); return x; }
function main(n) { return f(n); }";
        prop_assert_eq!(run(source, vec![Value::Int32(n)]), Ok(Value::Int32(n)));
    }

    #[test]
    fn recursive_sum_matches_closed_form(n in 0i32..200) {
        let source = "function sum(n) { if (n <= 0) return 0; return n + sum(n - 1); }
function main(n) { return sum(n); }";
        prop_assert_eq!(run(source, vec![Value::Int32(n)]), Ok(Value::Int32(n * (n + 1) / 2)));
    }

    #[test]
    fn locals_shadow_globals(global in any::<i32>(), local in any::<i32>()) {
        let program = Compiler::new()
            .compile("function f(x) { return x; }\nfunction main(v) { return f(v) . \"/\" . x; }")
            .unwrap();
        let mut vm = Vm::new(Environment::standard());
        vm.set_global("x", Value::Int32(global));
        vm.load(&program).unwrap();
        let result = vm.run(vec![Value::Int32(local)]).unwrap();
        prop_assert_eq!(result, Value::from(format!("{local}/{global}")));
    }

    #[test]
    fn constants_win_over_globals(constant in any::<i32>(), global in any::<i32>()) {
        let program = Compiler::new().compile("function main() { return LIMIT; }").unwrap();
        let mut vm = Vm::new(Environment::standard());
        vm.set_global("LIMIT", Value::Int32(global));
        vm.set_constant("LIMIT", Value::Int32(constant));
        vm.load(&program).unwrap();
        prop_assert_eq!(vm.run(vec![]).unwrap(), Value::Int32(constant));
    }
}
