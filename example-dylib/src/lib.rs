use std::ffi::{c_char, CStr};
use std::sync::atomic::{AtomicI32, Ordering};

#[no_mangle]
pub extern "C" fn add(a: i32, b: i32) -> i32 {
    a + b
}

#[no_mangle]
pub static ANSWER: i32 = 42;

#[no_mangle]
pub static COUNTER: AtomicI32 = AtomicI32::new(0);

#[no_mangle]
pub extern "C" fn bump() -> i32 {
    COUNTER.fetch_add(1, Ordering::SeqCst) + 1
}

#[repr(C)]
pub struct Calculator {
    pub name: extern "C" fn() -> *const c_char,
    pub calculate: extern "C" fn(f32, f32) -> f32,
}

extern "C" fn sum_name() -> *const c_char {
    static NAME: &CStr = c"sum";
    NAME.as_ptr()
}

extern "C" fn sum(a: f32, b: f32) -> f32 {
    a + b
}

static SUM: Calculator = Calculator {
    name: sum_name,
    calculate: sum,
};

/// The plugin instance, published under a fixed name for `import_alias`.
#[no_mangle]
#[allow(non_upper_case_globals)]
pub static plugin: &Calculator = &SUM;
