//! Benchmark for annobin serialization using a synthetic annotation graph.
//!
//! Builds a document-like store (tokens, entities, cross references),
//! then times full encode, decode, and delta encode at a few zstd levels.

use std::sync::Arc;
use std::time::Instant;

use annobin::codec::{
    DeserializeOptions, SerializeOptions, deserialize, serialize, serialize_delta,
};
use annobin::{FsId, IndexDef, Range, SortOrder, Store, TYPE_TOP, TypeSystem, TypeSystemBuilder};

const TOKENS: usize = 100_000;
const ENTITIES: usize = 10_000;

const WORDS: &[&str] = &[
    "the", "quick", "brown", "fox", "jumps", "over", "lazy", "dog", "annotation",
    "graph", "binary", "codec", "stream", "index", "delta", "string",
];

fn schema() -> (Arc<TypeSystem>, u32, u32) {
    let mut b = TypeSystemBuilder::new();
    let token = b.add_type("Token", TYPE_TOP).unwrap();
    b.add_feature(token, "begin", Range::Int).unwrap();
    b.add_feature(token, "end", Range::Int).unwrap();
    b.add_feature(token, "text", Range::String).unwrap();
    let entity = b.add_type("Entity", TYPE_TOP).unwrap();
    b.add_feature(entity, "kind", Range::String).unwrap();
    b.add_feature(entity, "confidence", Range::Float).unwrap();
    b.add_feature(entity, "first", Range::Ref).unwrap();
    b.add_feature(entity, "last", Range::Ref).unwrap();
    (b.commit().unwrap(), token, entity)
}

fn build_store(ts: &Arc<TypeSystem>, token: u32, entity: u32) -> (Store, Vec<FsId>) {
    let mut store = Store::new(ts);
    let view = store.create_view("_InitialView");
    store.add_index(IndexDef {
        name: "annotations".into(),
        type_code: token,
        keys: vec![(0, SortOrder::Ascending), (1, SortOrder::Descending)],
    });

    let mut tokens: Vec<FsId> = Vec::with_capacity(TOKENS);
    let mut pos = 0i32;
    for i in 0..TOKENS {
        let word = WORDS[i % WORDS.len()];
        let id = store.create_fs(token);
        store.set_int_value(id, 0, pos);
        pos += word.len() as i32;
        store.set_int_value(id, 1, pos);
        pos += 1;
        store.set_string_value(id, 2, Some(word));
        store.index_fs(view, id);
        tokens.push(id);
    }
    for i in 0..ENTITIES {
        let id = store.create_fs(entity);
        store.set_string_value(id, 0, if i % 2 == 0 { Some("PERSON") } else { Some("PLACE") });
        store.set_float_value(id, 1, (i % 100) as f32 / 100.0);
        store.set_ref_value(id, 2, Some(tokens[(i * 7) % TOKENS]));
        store.set_ref_value(id, 3, Some(tokens[(i * 7 + 3) % TOKENS]));
        store.index_fs(view, id);
    }
    (store, tokens)
}

fn main() {
    let (ts, token, entity) = schema();
    let t0 = Instant::now();
    let (mut store, tokens) = build_store(&ts, token, entity);
    println!(
        "built {} objects in {:?}",
        store.ids().count(),
        t0.elapsed()
    );

    for level in [1, 3, 9] {
        let mut options = SerializeOptions::new();
        options.level = level;
        let t = Instant::now();
        let out = serialize(&store, &options).unwrap();
        let encode = t.elapsed();

        let mut copy = Store::new(&ts);
        let t = Instant::now();
        deserialize(&mut copy, &out.bytes, &DeserializeOptions::default()).unwrap();
        let decode = t.elapsed();

        println!(
            "level {level}: {:>9} bytes  encode {encode:>10.2?}  decode {decode:>10.2?}",
            out.bytes.len()
        );
    }

    // delta: touch 1% of the tokens and add a handful of entities
    let baseline = serialize(&store, &SerializeOptions::new()).unwrap();
    let marker = store.mark();
    for i in (0..TOKENS).step_by(100) {
        let id = tokens[i];
        let end = store.int_value(id, 1);
        store.set_int_value(id, 1, end + 1);
    }
    for _ in 0..100 {
        let id = store.create_fs(entity);
        store.set_string_value(id, 0, Some("NEW"));
        store.index_fs(0, id);
    }
    let t = Instant::now();
    let delta = serialize_delta(&store, &marker, &baseline.reuse, &SerializeOptions::new()).unwrap();
    println!(
        "delta: {:>9} bytes  encode {:>10.2?}  ({}x smaller than full)",
        delta.bytes.len(),
        t.elapsed(),
        baseline.bytes.len() / delta.bytes.len().max(1)
    );
}
