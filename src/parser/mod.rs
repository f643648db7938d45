//! The grammar walker (§4.1-§4.3). Unlike a combinator parser built over a generic `&[u8]`, every
//! function here takes the live [`AmlContext`] and (where relevant) the current [`MethodState`],
//! because AML's grammar isn't context-free: parsing a method invocation needs to already know the
//! target's declared argument count, and a `NameString`'s very last segment can't be classified
//! without resolving it against the namespace as built so far. Parsing and evaluation are
//! therefore the same pass - there is no intermediate AST.

pub(crate) mod data;
pub(crate) mod expression;
pub(crate) mod named;
pub(crate) mod namespace_modifier;
pub(crate) mod statement;
pub(crate) mod supername;
pub(crate) mod term;

use crate::{method::MethodState, name::AmlName, stream::Stream, AmlContext, AmlError};
use alloc::sync::Arc;

/// Parses a `TermList` spanning the whole of `table` into the global namespace (§6.1). Called
/// once per table (DSDT, then each SSDT in turn) by [`AmlContext::parse_table`].
pub fn parse_definition_block(ctx: &AmlContext, table: Arc<[u8]>) -> Result<(), AmlError> {
    let mut stream = Stream::new(&table);
    let pkg = crate::pkg_length::PkgLength::from_table_length(table.len());
    let mut state = MethodState::outside_method(AmlName::root());

    let token = ctx.namespace.push_overlay();
    match term::term_list(ctx, &mut state, &mut stream, &pkg, &table) {
        Ok(_) => {
            ctx.namespace.commit(token, ctx.sysfs());
            Ok(())
        }
        Err(e) => {
            ctx.namespace.discard(token, ctx.sysfs());
            Err(e)
        }
    }
}
