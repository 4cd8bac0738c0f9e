#![no_main]

use cf_core::{ColumnKind, Schema};
use cf_engine::expr::{CompiledExpr, Leaves};
use libfuzzer_sys::fuzz_target;

struct Fixed;

impl Leaves for Fixed {
    fn len(&self, var: usize) -> usize {
        var % 4
    }

    fn get(&self, var: usize, instance: usize) -> f64 {
        (var * 7 + instance) as f64 - 3.5
    }
}

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let schema = Schema::new()
        .with_column("met", ColumnKind::Scalar)
        .with_column("w", ColumnKind::Scalar)
        .with_column("jet_pt", ColumnKind::Jagged)
        .with_column("jet_eta", ColumnKind::Jagged);

    let Ok(expr) = CompiledExpr::compile(text, &schema) else {
        return;
    };
    let n = expr.multiplicity(&Fixed);
    for i in 0..=n {
        let _ = expr.eval_instance(&Fixed, i);
    }
    if !expr.is_jagged() {
        let row = vec![1.25; expr.required_columns.len()];
        let _ = expr.eval_row(&row);
    }
});
