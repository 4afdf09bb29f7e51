use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, DeriveInput, Fields, FieldsNamed};

fn named_fields<'a>(input: &'a DeriveInput, derive: &str) -> Result<&'a FieldsNamed, TokenStream> {
    if let syn::Data::Struct(ref data) = input.data {
        if let Fields::Named(ref fields) = data.fields {
            return Ok(fields);
        }
    }
    Err(TokenStream::from(
        syn::Error::new(
            input.ident.span(),
            format!("Only structs with named fields can derive `{derive}`"),
        )
        .to_compile_error(),
    ))
}

/// This derives the `SizedProt` trait for structs: the wire size is the sum of the field sizes.
#[proc_macro_derive(SizedProt)]
pub fn derive_sized_prot(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let fields = match named_fields(&input, "SizedProt") {
        Ok(fields) => fields,
        Err(err) => return err,
    };
    let field_vals = fields.named.iter().map(|field| {
        let name = &field.ident;
        quote!(self.#name.prot_size())
    });
    let name = &input.ident;

    TokenStream::from(quote!(
        impl crate::protocol_types::traits::SizedProt for #name {
            fn prot_size(&self) -> usize {
                0 #(+ #field_vals)*
            }
        }
    ))
}

/// This derives the `WriteProt` trait for structs, writing fields in declaration order.
#[proc_macro_derive(WriteProt)]
pub fn derive_write_prot(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let fields = match named_fields(&input, "WriteProt") {
        Ok(fields) => fields,
        Err(err) => return err,
    };
    let field_vals = fields.named.iter().map(|field| {
        let name = &field.ident;
        quote!(crate::protocol_types::traits::WriteProt::write(&self.#name, stream).await?;)
    });
    let name = &input.ident;

    TokenStream::from(quote!(
        #[::async_trait::async_trait]
        impl crate::protocol_types::traits::WriteProt for #name {
            async fn write(
                &self,
                stream: &mut (impl ::tokio::io::AsyncWrite + Unpin + Send),
            ) -> Result<(), String> {
                #(#field_vals)*
                Ok(())
            }
        }
    ))
}

/// This derives the `ReadProt` trait for structs, reading fields in declaration order.
#[proc_macro_derive(ReadProt)]
pub fn derive_read_prot(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let fields = match named_fields(&input, "ReadProt") {
        Ok(fields) => fields,
        Err(err) => return err,
    };
    let field_vals = fields.named.iter().map(|field| {
        let name = &field.ident;
        let ty = &field.ty;
        quote!(#name: <#ty as crate::protocol_types::traits::ReadProt>::read(stream).await?,)
    });
    let name = &input.ident;

    TokenStream::from(quote!(
        #[::async_trait::async_trait]
        impl crate::protocol_types::traits::ReadProt for #name {
            async fn read(
                stream: &mut (impl ::tokio::io::AsyncRead + Unpin + Send),
            ) -> Result<Self, String>
            where
                Self: Sized,
            {
                Ok(#name {
                    #(#field_vals)*
                })
            }
        }
    ))
}
