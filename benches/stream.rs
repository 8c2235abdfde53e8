//! Benchmarks for the instruction-stream pipeline.
//!
//! Covers the three stages a rewrite goes through:
//! - Decoding a method body into an operation stream
//! - Splicing a guarded setter block before an anchor
//! - Encoding the result, including branch relaxation

extern crate dotpatch;

use criterion::{criterion_group, criterion_main, Criterion};
use dotpatch::{
    assembly::{decode, encode, InstructionStream, OpCode, Operation},
    metadata::body::{MethodDef, MethodFlags},
    patch::{LocalCallPattern, SentinelSplice},
    Catalog, EngineConfig, MethodIdentity, MethodRef, Rewrite, RewriteContext,
};
use std::hint::black_box;

const CONTROLLER: &str = "Acme.Server.Controllers.InformationServerController";
const CONTROLLER_BASE: &str = "Microsoft.AspNetCore.Mvc.ControllerBase";
const MODEL: &str = "Acme.Server.Models.ServerInformationResponseModel";

fn ok() -> MethodRef {
    MethodRef::instance(CONTROLLER_BASE, "Ok")
        .with_params(&["System.Object"])
        .returning("Microsoft.AspNetCore.Mvc.OkObjectResult")
}

/// A body with `blocks` counted loops followed by the `Ok(model)` tail.
fn stream(blocks: usize) -> InstructionStream {
    let mut stream = InstructionStream::new();
    stream.push(Operation::load_arg(0));
    stream.push(Operation::call(
        MethodRef::instance(CONTROLLER, "GetServerInformation").returning(MODEL),
    ));
    stream.push(Operation::store_local(2));

    for _ in 0..blocks {
        let head = stream.define_label();
        let exit = stream.define_label();
        stream.push(Operation::push_int(0));
        stream.push(Operation::store_local(0));
        stream.push(Operation::load_local(0).with_label(head));
        stream.push(Operation::push_int(10));
        stream.push(Operation::simple(OpCode::CompareEq));
        stream.push(Operation::branch(OpCode::BranchIfTrue, exit));
        stream.push(Operation::load_local(0));
        stream.push(Operation::push_int(1));
        stream.push(Operation::simple(OpCode::Add));
        stream.push(Operation::store_local(0));
        stream.push(Operation::branch(OpCode::Branch, head));
        stream.push(Operation::simple(OpCode::Nop).with_label(exit));
    }

    stream.push(Operation::load_arg(0));
    stream.push(Operation::load_local(2));
    stream.push(Operation::call_virtual(ok()));
    stream.push(Operation::simple(OpCode::Return));
    stream
}

fn method(stream: &InstructionStream) -> MethodDef {
    MethodDef {
        identity: MethodIdentity::new(CONTROLLER, "Information", &[]),
        flags: MethodFlags::empty(),
        params: Vec::new(),
        returns: Some("Microsoft.AspNetCore.Mvc.IActionResult".to_string()),
        locals: vec!["System.Int32".to_string(), "System.Object".to_string(), MODEL.to_string()],
        body: encode(stream, true, &EngineConfig::default()).unwrap(),
    }
}

/// Benchmark decoding a short body and one with long branches.
fn bench_decode(c: &mut Criterion) {
    for blocks in [1, 32] {
        let body = method(&stream(blocks)).body;
        c.bench_function(&format!("decode_{blocks}_blocks"), |b| {
            b.iter(|| {
                let stream = decode(black_box(&body.code), black_box(&body.tokens)).unwrap();
                black_box(stream)
            });
        });
    }
}

/// Benchmark encoding, with and without short-branch relaxation.
fn bench_encode(c: &mut Criterion) {
    let stream = stream(32);
    let relaxed = EngineConfig::default();
    let long = EngineConfig::default().with_short_branches(false);

    c.bench_function("encode_32_blocks", |b| {
        b.iter(|| black_box(encode(black_box(&stream), true, &relaxed).unwrap()));
    });
    c.bench_function("encode_32_blocks_long_branches", |b| {
        b.iter(|| black_box(encode(black_box(&stream), true, &long).unwrap()));
    });
}

/// Benchmark the sentinel splice followed by re-encoding.
fn bench_rewrite(c: &mut Criterion) {
    let catalog = Catalog::new();
    catalog.add_property(MODEL, "Version", "System.String");
    catalog.add_property(MODEL, "AssemblyVersion", "System.String");

    let original = stream(8);
    let def = method(&original);
    let context = RewriteContext::new(&def, &catalog);
    let splice = SentinelSplice::new(
        LocalCallPattern::new("Ok", CONTROLLER_BASE),
        &[(MODEL, "set_Version"), (MODEL, "set_AssemblyVersion")],
        "🍌",
    );
    let config = EngineConfig::default();

    c.bench_function("rewrite_and_encode", |b| {
        b.iter(|| {
            let rewritten = splice.rewrite(black_box(&original), &context).unwrap();
            black_box(encode(&rewritten, true, &config).unwrap())
        });
    });
}

criterion_group!(benches, bench_decode, bench_encode, bench_rewrite);
criterion_main!(benches);
