//! Generates the Swift and Kotlin bindings of the `flowgate` library.

fn main() {
    uniffi::uniffi_bindgen_main();
}
