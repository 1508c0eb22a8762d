//! Standard-library modules (`pkl:` scheme) embedded in the binary.
//!
//! Trust level 0: importable by everyone, may import nothing more trusted.

/// `(name, text)` of every embedded module.
pub const STANDARD_LIBRARY_MODULES: &[(&str, &str)] = &[
    ("base", BASE),
    ("math", MATH),
    ("release", RELEASE),
];

const BASE: &str = r#"
name = "base"
nullValue = ""
trueValue = true
falseValue = false
"#;

const MATH: &str = r#"
minInt = -9223372036854775808
maxInt = 9223372036854775807
pi = 3.141592653589793
e = 2.718281828459045
"#;

const RELEASE: &str = concat!(
    "name = \"tessera\"\n",
    "version = \"",
    env!("CARGO_PKG_VERSION"),
    "\"\n",
);

/// Looks up an embedded module by name (`base` for `pkl:base`).
#[must_use]
pub fn standard_library_module(name: &str) -> Option<&'static str> {
    STANDARD_LIBRARY_MODULES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, text)| *text)
}
