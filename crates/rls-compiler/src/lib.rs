//! RLS compiler - declarative row-level-security rules to IR

mod compiler;
mod template;

pub use compiler::{
    compile, compile_policy_set, CompileError, PolicyCompiler, AND_OPERATOR, OR_OPERATOR,
    USER_CONDITION,
};
pub use template::{
    is_template_like, parse_template, TemplateError, TemplateResolver, DEFAULT_ATTRIBUTES,
};
