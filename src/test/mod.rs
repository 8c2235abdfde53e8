//! Shared fixtures for unit tests.
//!
//! The central fixture is a controller action that fetches a response model into local 2 and
//! hands it to `ControllerBase::Ok`:
//!
//! ```text
//! ldarg.0
//! call     InformationServerController::GetServerInformation
//! stloc.2
//! ldarg.0
//! ldloc.2
//! callvirt ControllerBase::Ok
//! ret
//! ```

use std::sync::{Arc, Mutex};

use crate::{
    assembly::{decode, opcodes::*, InstructionStream},
    emulation::Value,
    metadata::{
        body::{MethodBody, MethodDef, MethodFlags, TokenTable},
        catalog::Catalog,
        identity::{MethodIdentity, MethodRef},
    },
};

pub const CONTROLLER_TYPE: &str = "Acme.Server.Controllers.InformationServerController";
pub const CONTROLLER_BASE: &str = "Microsoft.AspNetCore.Mvc.ControllerBase";
pub const MODEL_TYPE: &str = "Acme.Server.Models.ServerInformationResponseModel";
pub const ACTION_RESULT: &str = "Microsoft.AspNetCore.Mvc.IActionResult";
pub const OK_RESULT: &str = "Microsoft.AspNetCore.Mvc.OkObjectResult";
pub const SENTINEL: &str = "🍌";

/// Ordered record of native calls made by a fixture catalog.
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn information_identity() -> MethodIdentity {
    MethodIdentity::new(CONTROLLER_TYPE, "Information", &[])
}

pub fn get_server_information() -> MethodRef {
    MethodRef::instance(CONTROLLER_TYPE, "GetServerInformation").returning(MODEL_TYPE)
}

pub fn ok_method() -> MethodRef {
    MethodRef::instance(CONTROLLER_BASE, "Ok")
        .with_params(&["System.Object"])
        .returning(OK_RESULT)
}

// Helper function to assemble the Information body with its token table
pub fn information_body() -> MethodBody {
    let mut tokens = TokenTable::new();
    let fetch = tokens.intern_member(&get_server_information()).unwrap();
    let ok = tokens.intern_member(&ok_method()).unwrap();

    let mut code = vec![LDARG_0, CALL];
    code.extend_from_slice(&fetch.value().to_le_bytes());
    code.extend_from_slice(&[STLOC_2, LDARG_0, LDLOC_2, CALLVIRT]);
    code.extend_from_slice(&ok.value().to_le_bytes());
    code.push(RET);

    MethodBody {
        code,
        tokens,
        max_stack: 2,
    }
}

pub fn information_method() -> MethodDef {
    MethodDef {
        identity: information_identity(),
        flags: MethodFlags::empty(),
        params: Vec::new(),
        returns: Some(ACTION_RESULT.to_string()),
        locals: vec![
            "System.Object".to_string(),
            "System.Object".to_string(),
            MODEL_TYPE.to_string(),
        ],
        body: information_body(),
    }
}

pub fn information_stream() -> InstructionStream {
    let body = information_body();
    decode(&body.code, &body.tokens).unwrap()
}

// Helper function to build a catalog around the Information action.
//
// `GetServerInformation` returns a fresh model when `with_model` is set and null otherwise.
// Every native records itself in the returned log, setters with their argument.
pub fn information_catalog(with_model: bool) -> (Arc<Catalog>, CallLog) {
    let catalog = Arc::new(Catalog::new());
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));

    catalog.add_type(CONTROLLER_TYPE, &[CONTROLLER_BASE]);
    catalog.add_type(MODEL_TYPE, &[]);
    catalog.add_method(information_method());

    let calls = log.clone();
    catalog.add_native(get_server_information(), move |_, _| {
        lock!(calls).push("GetServerInformation".to_string());
        if !with_model {
            return Ok(Some(Value::Null));
        }

        let model = Value::object(MODEL_TYPE);
        if let Some(object) = model.as_object() {
            object.set_field("Version", Value::from("1.2.3"));
            object.set_field("AssemblyVersion", Value::from("1.2.3.0"));
        }
        Ok(Some(model))
    });

    for property in ["Version", "AssemblyVersion"] {
        catalog.add_property(MODEL_TYPE, property, "System.String");

        let calls = log.clone();
        catalog.add_native(
            MethodRef::instance(MODEL_TYPE, &format!("set_{property}")).with_params(&["System.String"]),
            move |this, args| {
                let value = args.first().cloned().unwrap_or_default();
                lock!(calls).push(format!("set_{property}={}", value.as_str().unwrap_or("")));
                if let Some(object) = this.and_then(Value::as_object) {
                    object.set_field(property, value);
                }
                Ok(None)
            },
        );
    }

    let calls = log.clone();
    catalog.add_native(ok_method(), move |_, args| {
        lock!(calls).push("Ok".to_string());
        let result = Value::object(OK_RESULT);
        if let Some(object) = result.as_object() {
            object.set_field("Value", args.first().cloned().unwrap_or_default());
        }
        Ok(Some(result))
    });

    (catalog, log)
}

/// Initializes logging for tests that want to see engine diagnostics.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
