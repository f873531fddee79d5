//! FFI bindings for scanvox
//!
//! This module provides C-compatible functions for calling scanvox from other
//! languages. All functions use C strings (null-terminated) carrying JSON and
//! return allocated memory that must be freed by the caller using
//! `scanvox_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::config::EngineConfig;
use crate::error::EngageError;
use crate::pipeline::{decide, EngagementProcessor};
use crate::profile::{DiagnosedConditions, ProfileRegistry};
use crate::types::EngagementScores;

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Caller must free the result
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Hand a result across the boundary, recording the error on failure
fn respond(result: Result<String, EngageError>) -> *mut c_char {
    match result {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

fn parse<T: serde::de::DeserializeOwned>(what: &str, json: &str) -> Result<T, EngageError> {
    serde_json::from_str(json).map_err(|e| EngageError::ParseError(format!("{what}: {e}")))
}

fn decide_json(scores: &str, conditions: &str) -> Result<String, EngageError> {
    let scores: EngagementScores = parse("scores", scores)?;
    let conditions: DiagnosedConditions = parse("conditions", conditions)?;
    Ok(serde_json::to_string(&decide(&scores, &conditions))?)
}

fn profile_json(conditions: &str) -> Result<String, EngageError> {
    let conditions: DiagnosedConditions = parse("conditions", conditions)?;
    let registry = ProfileRegistry::standard();
    Ok(serde_json::to_string(registry.select(&conditions))?)
}

// ============================================================================
// Stateless API
// ============================================================================

/// Decide on an intervention for fused scores and condition flags.
///
/// # Safety
/// - `scores_json` and `conditions_json` must be valid null-terminated C strings.
/// - Returns a newly allocated verdict JSON string that must be freed with
///   `scanvox_free_string`.
/// - Returns NULL on error; call `scanvox_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn scanvox_decide_json(
    scores_json: *const c_char,
    conditions_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let Some(scores_str) = cstr_to_string(scores_json) else {
        set_last_error("Invalid scores string pointer");
        return ptr::null_mut();
    };
    let Some(conditions_str) = cstr_to_string(conditions_json) else {
        set_last_error("Invalid conditions string pointer");
        return ptr::null_mut();
    };

    respond(decide_json(&scores_str, &conditions_str))
}

/// Return the threshold profile selected for a set of condition flags.
///
/// # Safety
/// - `conditions_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `scanvox_free_string`.
/// - Returns NULL on error; call `scanvox_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn scanvox_profile_json(conditions_json: *const c_char) -> *mut c_char {
    clear_last_error();

    let Some(conditions_str) = cstr_to_string(conditions_json) else {
        set_last_error("Invalid conditions string pointer");
        return ptr::null_mut();
    };

    respond(profile_json(&conditions_str))
}

// ============================================================================
// Stateful Processor API
// ============================================================================

/// Opaque handle to an EngagementProcessor
pub struct ScanvoxProcessorHandle {
    processor: EngagementProcessor,
}

/// Create a processor from an engine config JSON document.
///
/// # Safety
/// - `config_json` must be a valid null-terminated C string, or NULL for defaults.
/// - Returns a pointer that must be freed with `scanvox_processor_free`.
/// - Returns NULL on error; call `scanvox_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn scanvox_processor_new(
    config_json: *const c_char,
) -> *mut ScanvoxProcessorHandle {
    clear_last_error();

    let config = if config_json.is_null() {
        Ok(EngineConfig::default())
    } else {
        match cstr_to_string(config_json) {
            Some(s) => EngineConfig::from_json(&s),
            None => Err(EngageError::ParseError(
                "Invalid config string pointer".to_string(),
            )),
        }
    };

    match config.and_then(EngagementProcessor::new) {
        Ok(processor) => Box::into_raw(Box::new(ScanvoxProcessorHandle { processor })),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Free a processor.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `scanvox_processor_new`.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn scanvox_processor_free(processor: *mut ScanvoxProcessorHandle) {
    if !processor.is_null() {
        drop(Box::from_raw(processor));
    }
}

/// Load model artifacts into a processor.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `scanvox_processor_new`.
/// - `stem` must be a valid null-terminated C string.
/// - Returns 0 on success, non-zero on error. On error the processor keeps
///   its previous model; call `scanvox_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn scanvox_processor_load_model(
    processor: *mut ScanvoxProcessorHandle,
    stem: *const c_char,
) -> i32 {
    clear_last_error();

    if processor.is_null() {
        set_last_error("Null processor pointer");
        return -1;
    }
    let handle = &mut *processor;

    let Some(stem_str) = cstr_to_string(stem) else {
        set_last_error("Invalid path string pointer");
        return -1;
    };

    match handle.processor.load_model(stem_str) {
        Ok(()) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Assess a session batch JSON document and return the analysis record.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `scanvox_processor_new`.
/// - `batch_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `scanvox_free_string`.
/// - Returns NULL on error; call `scanvox_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn scanvox_analyze_json(
    processor: *const ScanvoxProcessorHandle,
    batch_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if processor.is_null() {
        set_last_error("Null processor pointer");
        return ptr::null_mut();
    }
    let handle = &*processor;

    let Some(batch_str) = cstr_to_string(batch_json) else {
        set_last_error("Invalid batch string pointer");
        return ptr::null_mut();
    };

    respond(handle.processor.assess_json(&batch_str))
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by scanvox functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a scanvox function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn scanvox_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next scanvox function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn scanvox_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Get the scanvox library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn scanvox_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
