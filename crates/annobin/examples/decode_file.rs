//! Simple decoder to inspect ANB-1 files.
//!
//! Works on blobs serialized with `embed_schema`, since a standalone file
//! carries no out-of-band schema agreement.

use std::collections::HashMap;
use std::fs;

use annobin::codec::{DeserializeOptions, deserialize, embedded_schema};
use annobin::Store;

fn main() {
    let path = std::env::args()
        .nth(1)
        .expect("usage: decode_file <path-to-anb1-blob>");

    println!("Reading: {}", path);
    let data = fs::read(&path).expect("Failed to read file");
    println!("File size: {} bytes", data.len());

    let ts = embedded_schema(&data)
        .expect("Failed to read header")
        .expect("blob has no embedded schema; serialize with embed_schema");
    println!(
        "Embedded schema: {} types",
        ts.user_types().count()
    );
    let mut store = Store::new(&ts);
    let reuse = deserialize(&mut store, &data, &DeserializeOptions::default())
        .expect("Failed to decode");

    println!("\n=== Graph Info ===");
    println!("Objects in blob: {}", reuse.len());
    println!("Objects materialized: {}", store.ids().count());
    println!("Views: {}", store.view_count());
    for v in 0..store.view_count() {
        println!(
            "  [{}] {:?}: {} indexed, text: {}",
            v,
            store.view_name(v),
            store.indexed_fss(v).count(),
            store
                .document_text(v)
                .map(|t| format!("{} chars", t.chars().count()))
                .unwrap_or_else(|| "none".to_string()),
        );
    }

    let mut per_type: HashMap<&str, usize> = HashMap::new();
    for id in store.ids() {
        *per_type
            .entry(store.type_system().name_of(store.type_of(id)))
            .or_default() += 1;
    }
    let mut counts: Vec<_> = per_type.into_iter().collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    println!("\n=== Objects by type ===");
    for (name, count) in counts {
        println!("  {:>8}  {}", count, name);
    }
}
