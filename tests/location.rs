mod common;

use common::{compile, lib_path};
use dynlib::{
    ErrorKind, ImportedFn, LoadMode, SharedLibrary, import, import_fn, program_location,
    symbol_location, symbol_location_ptr, this_line_location,
};
use std::fs::canonicalize;

#[test]
fn imported_function_lives_in_the_library() {
    compile();
    let add = unsafe {
        import_fn::<extern "C" fn(i32, i32) -> i32>(lib_path(), "add", LoadMode::DEFAULT_MODE)
    }
    .unwrap();
    let location = symbol_location_ptr(ImportedFn::get(&add)).unwrap();
    assert_eq!(
        canonicalize(location).unwrap(),
        canonicalize(lib_path()).unwrap()
    );
    let wrapped = symbol_location_ptr(add).unwrap();
    assert_eq!(
        canonicalize(wrapped).unwrap(),
        canonicalize(lib_path()).unwrap()
    );
}

#[test]
fn imported_object_lives_in_the_library() {
    compile();
    let answer = unsafe { import::<i32>(lib_path(), "ANSWER", LoadMode::DEFAULT_MODE) }.unwrap();
    let location = symbol_location(&*answer).unwrap();
    assert_eq!(
        canonicalize(location).unwrap(),
        canonicalize(lib_path()).unwrap()
    );
}

#[test]
fn library_agrees_with_the_locator() {
    compile();
    let lib = SharedLibrary::open(lib_path(), LoadMode::DEFAULT_MODE).unwrap();
    let add = lib.symbol_address("add").unwrap();
    assert_eq!(
        canonicalize(symbol_location_ptr(add).unwrap()).unwrap(),
        canonicalize(lib.full_module_path().unwrap()).unwrap()
    );
}

#[test]
fn test_code_lives_in_the_program() {
    let program = canonicalize(program_location().unwrap()).unwrap();
    assert_eq!(canonicalize(this_line_location!().unwrap()).unwrap(), program);
    let local: fn() = test_code_lives_in_the_program;
    assert_eq!(
        canonicalize(symbol_location_ptr(local).unwrap()).unwrap(),
        program
    );
}

#[test]
fn null_is_rejected() {
    let err = symbol_location_ptr(std::ptr::null_mut::<u8>()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NullAddress);
}
