mod graph_value;

use proc_macro::TokenStream;

#[proc_macro_derive(GraphValue, attributes(graphwire))]
pub fn derive_graph_value(input: TokenStream) -> TokenStream {
	graph_value::derive(input).into()
}
