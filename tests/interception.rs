//! End-to-end interception through the public API.
//!
//! Builds a small in-memory application (a server-information controller and a content-type
//! repository), patches it the way a host would at startup, and checks the observable behavior
//! before, during and after the patches are installed.

use std::sync::{Arc, Mutex};

use dotpatch::prelude::*;
use rayon::prelude::*;

const CONTROLLER: &str = "Acme.Server.Controllers.InformationServerController";
const CONTROLLER_BASE: &str = "Microsoft.AspNetCore.Mvc.ControllerBase";
const MODEL: &str = "Acme.Server.Models.ServerInformationResponseModel";
const ACTION_RESULT: &str = "Microsoft.AspNetCore.Mvc.IActionResult";
const OK_RESULT: &str = "Microsoft.AspNetCore.Mvc.OkObjectResult";

const REPOSITORY: &str = "Acme.Persistence.ContentTypeRepositoryBase`1[Acme.Models.IContentType]";
const CONTENT_TYPE: &str = "Acme.Models.ContentType";
const COMPOSITION: &str = "Acme.Models.IContentTypeComposition";
const STRING: &str = "System.String";

const SENTINEL: &str = "🍌";

type Calls = Arc<Mutex<Vec<String>>>;

fn record(calls: &Calls, entry: String) {
    calls.lock().unwrap().push(entry);
}

fn fetch_information() -> MethodRef {
    MethodRef::instance(CONTROLLER, "GetServerInformation").returning(MODEL)
}

fn ok() -> MethodRef {
    MethodRef::instance(CONTROLLER_BASE, "Ok")
        .with_params(&["System.Object"])
        .returning(OK_RESULT)
}

fn information() -> MethodIdentity {
    method_identity!(CONTROLLER, "Information", [])
}

fn persist_updated_item() -> MethodIdentity {
    method_identity!(REPOSITORY, "PersistUpdatedItem", [COMPOSITION])
}

fn get_all() -> MethodIdentity {
    method_identity!(REPOSITORY, "GetAll", [])
}

fn define(
    identity: MethodIdentity,
    params: Vec<Param>,
    returns: Option<&str>,
    locals: &[&str],
    ops: Vec<Operation>,
) -> MethodDef {
    let stream = InstructionStream::from_operations(ops);
    let body = encode(&stream, returns.is_some(), &EngineConfig::default()).unwrap();
    MethodDef {
        identity,
        flags: MethodFlags::empty(),
        params,
        returns: returns.map(str::to_string),
        locals: locals.iter().map(|l| (*l).to_string()).collect(),
        body,
    }
}

/// The application: an `Information` action returning `Ok(GetServerInformation())`, and a
/// repository whose `PersistUpdatedItem` returns the description it persisted.
fn application(with_model: bool) -> (Arc<Catalog>, Calls) {
    let catalog = Arc::new(Catalog::new());
    let calls: Calls = Arc::new(Mutex::new(Vec::new()));

    catalog.add_type(CONTROLLER, &[CONTROLLER_BASE]);
    catalog.add_type(MODEL, &[]);
    catalog.add_type(CONTENT_TYPE, &[COMPOSITION]);

    catalog.add_method(define(
        information(),
        Vec::new(),
        Some(ACTION_RESULT),
        &["System.Object", "System.Object", MODEL],
        vec![
            Operation::load_arg(0),
            Operation::call(fetch_information()),
            Operation::store_local(2),
            Operation::load_arg(0),
            Operation::load_local(2),
            Operation::call_virtual(ok()),
            Operation::simple(OpCode::Return),
        ],
    ));

    catalog.add_method(define(
        persist_updated_item(),
        vec![Param::new("entity", COMPOSITION)],
        Some(STRING),
        &[],
        vec![
            Operation::load_arg(1),
            Operation::call_virtual(
                MethodRef::instance(CONTENT_TYPE, "get_Description").returning(STRING),
            ),
            Operation::simple(OpCode::Return),
        ],
    ));

    catalog.add_method(define(
        get_all(),
        Vec::new(),
        Some(STRING),
        &[],
        vec![
            Operation::push_string("Article,Page,Folder"),
            Operation::simple(OpCode::Return),
        ],
    ));

    let log = calls.clone();
    catalog.add_native(fetch_information(), move |_, _| {
        record(&log, "GetServerInformation".to_string());
        if !with_model {
            return Ok(Some(Value::Null));
        }
        let model = Value::object(MODEL);
        if let Some(object) = model.as_object() {
            object.set_field("Version", Value::from("13.1.0"));
            object.set_field("AssemblyVersion", Value::from("13.1.0.0"));
        }
        Ok(Some(model))
    });

    for property in ["Version", "AssemblyVersion"] {
        let log = calls.clone();
        catalog.add_native(
            MethodRef::instance(MODEL, &format!("set_{property}")).with_params(&[STRING]),
            move |this, args| {
                let value = args.first().cloned().unwrap_or_default();
                record(&log, format!("set_{property}"));
                if let Some(object) = this.and_then(Value::as_object) {
                    object.set_field(property, value);
                }
                Ok(None)
            },
        );
    }

    let log = calls.clone();
    catalog.add_native(ok(), move |_, args| {
        record(&log, "Ok".to_string());
        let result = Value::object(OK_RESULT);
        if let Some(object) = result.as_object() {
            object.set_field("Value", args.first().cloned().unwrap_or_default());
        }
        Ok(Some(result))
    });

    catalog.add_property(CONTENT_TYPE, "Description", STRING);

    (catalog, calls)
}

fn version_splice() -> SentinelSplice {
    SentinelSplice::new(
        LocalCallPattern::new("Ok", CONTROLLER_BASE),
        &[(MODEL, "set_Version"), (MODEL, "set_AssemblyVersion")],
        SENTINEL,
    )
    .named("hide-server-version")
}

fn controller() -> Value {
    Value::object(CONTROLLER)
}

fn model_field(result: Option<Value>, field: &str) -> Option<Value> {
    let result = result?;
    let model = result.as_object()?.field("Value")?;
    model.as_object()?.field(field)
}

#[test]
fn sentinel_replaces_versions_until_revoked() {
    let (catalog, calls) = application(true);
    let registry = Registry::new(catalog.clone(), catalog);
    let target = information();

    let before = registry.invoke(&target, Some(controller()), Vec::new()).unwrap();
    assert_eq!(model_field(before, "Version"), Some(Value::from("13.1.0")));

    let session = registry.session("server-information");
    let handle = session.register_rewrite(&target, version_splice()).unwrap();
    assert_eq!(handle.kind(), PatchKind::Rewrite);
    assert_eq!(handle.name(), "hide-server-version");
    assert_eq!(registry.current_stream(&target).unwrap().len(), 16);

    calls.lock().unwrap().clear();
    let patched = registry.invoke(&target, Some(controller()), Vec::new()).unwrap();
    assert_eq!(
        *calls.lock().unwrap(),
        ["GetServerInformation", "set_Version", "set_AssemblyVersion", "Ok"]
    );
    assert_eq!(model_field(patched.clone(), "Version"), Some(Value::from(SENTINEL)));
    assert_eq!(model_field(patched, "AssemblyVersion"), Some(Value::from(SENTINEL)));

    assert_eq!(session.revoke().unwrap(), 1);
    assert!(!registry.is_patched(&target));

    let restored = registry.invoke(&target, Some(controller()), Vec::new()).unwrap();
    assert_eq!(model_field(restored, "Version"), Some(Value::from("13.1.0")));
}

#[test]
fn null_model_reaches_ok_untouched() {
    let (catalog, calls) = application(false);
    let registry = Registry::new(catalog.clone(), catalog);
    let session = registry.session("server-information");
    session.register_rewrite(&information(), version_splice()).unwrap();

    let result = registry
        .invoke(&information(), Some(controller()), Vec::new())
        .unwrap()
        .unwrap();

    assert_eq!(*calls.lock().unwrap(), ["GetServerInformation", "Ok"]);
    let ok_result = result.as_object().unwrap();
    assert!(ok_result.field("Value").unwrap().is_null());
}

#[test]
fn prefix_mutates_the_persisted_entity() {
    let (catalog, _) = application(true);
    let registry = Registry::new(catalog.clone(), catalog);
    let session = registry.session("content-types");

    session
        .register_before(
            &persist_updated_item(),
            Hook::new("clear-description")
                .bind_instance(REPOSITORY)
                .bind_arg("entity", COMPOSITION)
                .before(|_, args| {
                    if let Some(entity) = args.get("entity").and_then(Value::as_object) {
                        entity.set_field("Description", Value::from(""));
                    }
                    Ok(PreHookResult::Continue)
                }),
        )
        .unwrap();

    let entity = Value::object(CONTENT_TYPE);
    entity
        .as_object()
        .unwrap()
        .set_field("Description", Value::from("Legacy description"));

    let persisted = registry
        .invoke(
            &persist_updated_item(),
            Some(Value::object(REPOSITORY)),
            vec![entity.clone()],
        )
        .unwrap();

    assert_eq!(persisted, Some(Value::from("")));
    assert_eq!(
        entity.as_object().unwrap().field("Description"),
        Some(Value::from(""))
    );
}

#[test]
fn postfix_replaces_the_result() {
    let (catalog, _) = application(true);
    let registry = Registry::new(catalog.clone(), catalog);
    let session = registry.session("content-types");

    session
        .register_after(
            &get_all(),
            Hook::new("filter-element-types")
                .bind_result("System.Object")
                .after(|_, result| {
                    let filtered = result
                        .as_ref()
                        .and_then(Value::as_str)
                        .map(|all| {
                            all.split(',')
                                .filter(|name| *name != "Folder")
                                .collect::<Vec<_>>()
                                .join(",")
                        });
                    *result = filtered.map(Value::from);
                    Ok(())
                }),
        )
        .unwrap();

    let result = registry
        .invoke(&get_all(), Some(Value::object(REPOSITORY)), Vec::new())
        .unwrap();
    assert_eq!(result, Some(Value::from("Article,Page")));
}

#[test]
fn open_generic_name_does_not_resolve() {
    let (catalog, _) = application(true);
    let registry = Registry::new(catalog.clone(), catalog);
    let session = registry.session("content-types");

    let open = method_identity!(
        "Acme.Persistence.ContentTypeRepositoryBase`1",
        "GetAll",
        []
    );
    let error = session
        .register_after(&open, Hook::new("noop").after(|_, _| Ok(())))
        .unwrap_err();
    assert!(matches!(error, Error::NotFound(_)));
    assert!(session.handles().is_empty());
}

#[test]
fn bootstrap_skips_what_it_cannot_patch() {
    let (catalog, _) = application(true);
    let registry = Registry::new(catalog.clone(), catalog);

    let mut bootstrap = Bootstrap::new(&registry, "startup");
    bootstrap
        .rewrite(&information(), version_splice())
        .rewrite(&get_all(), version_splice())
        .after(
            &method_identity!(REPOSITORY, "Delete", [COMPOSITION]),
            Hook::new("noop").after(|_, _| Ok(())),
        );
    let (session, report) = bootstrap.finish();

    assert_eq!(report.applied_count(), 1);
    assert_eq!(report.skipped_count(), 2);
    let skipped: Vec<_> = report.skipped().collect();
    assert!(matches!(
        skipped[0].outcome,
        PatchOutcome::Skipped(Error::PatternNotMatched(_))
    ));
    assert!(matches!(
        skipped[1].outcome,
        PatchOutcome::Skipped(Error::NotFound(_))
    ));

    assert!(registry.is_patched(&information()));
    assert!(!registry.is_patched(&get_all()));
    assert_eq!(session.revoke().unwrap(), 1);
}

#[test]
fn concurrent_invocations_see_a_consistent_stream() {
    let (catalog, _) = application(true);
    let registry = Registry::new(catalog.clone(), catalog);
    let session = registry.session("server-information");
    session.register_rewrite(&information(), version_splice()).unwrap();

    let versions: Vec<Option<Value>> = (0..64)
        .into_par_iter()
        .map(|_| {
            let result = registry
                .invoke(&information(), Some(controller()), Vec::new())
                .unwrap();
            model_field(result, "Version")
        })
        .collect();

    assert!(versions.iter().all(|v| *v == Some(Value::from(SENTINEL))));
}

#[test]
fn revocation_during_invocations_never_mixes_streams() {
    let (catalog, _) = application(true);
    let registry = Registry::new(catalog.clone(), catalog);
    let session = registry.session("server-information");
    session.register_rewrite(&information(), version_splice()).unwrap();

    let (_, versions) = rayon::join(
        || session.revoke().unwrap(),
        || {
            (0..32)
                .into_par_iter()
                .map(|_| {
                    let result = registry
                        .invoke(&information(), Some(controller()), Vec::new())
                        .unwrap();
                    model_field(result, "Version")
                })
                .collect::<Vec<_>>()
        },
    );

    for version in versions {
        assert!(
            version == Some(Value::from(SENTINEL)) || version == Some(Value::from("13.1.0")),
            "unexpected version {version:?}"
        );
    }
    assert!(!registry.is_patched(&information()));
}
