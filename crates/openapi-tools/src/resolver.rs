//! `OpenAPI` `$ref` resolver for local references.
//!
//! The `openapiv3` crate models `$ref`s using `ReferenceOr<T>` but does not resolve them.
//! This resolver follows `#/...` JSON pointers inside the one loaded document, chasing
//! ref-to-ref chains with cycle detection. References into other documents are rejected;
//! the operation that uses one is skipped by the index.

use crate::error::{OpenApiToolsError, Result};
use openapiv3::{OpenAPI, Parameter, PathItem, ReferenceOr, RequestBody, Schema, SecurityScheme};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashSet;

#[derive(Debug)]
pub struct LocalResolver {
    root: Value,
}

impl LocalResolver {
    /// Create a resolver over a parsed document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be converted into JSON for pointer lookups.
    pub fn new(spec: &OpenAPI) -> Result<Self> {
        let root =
            serde_json::to_value(spec).map_err(|e| OpenApiToolsError::OpenApi(e.to_string()))?;
        Ok(Self { root })
    }

    /// # Errors
    ///
    /// Returns an error if the reference is external, dangling, or cyclic.
    pub fn parameter(&self, param: &ReferenceOr<Parameter>) -> Result<Parameter> {
        self.resolve(param)
    }

    /// # Errors
    ///
    /// Returns an error if the reference is external, dangling, or cyclic.
    pub fn request_body(&self, body: &ReferenceOr<RequestBody>) -> Result<RequestBody> {
        self.resolve(body)
    }

    /// # Errors
    ///
    /// Returns an error if the reference is external, dangling, or cyclic.
    pub fn schema(&self, schema: &ReferenceOr<Schema>) -> Result<Schema> {
        self.resolve(schema)
    }

    /// Boxed schemas appear for object properties and array items.
    ///
    /// # Errors
    ///
    /// Returns an error if the reference is external, dangling, or cyclic.
    pub fn boxed_schema(&self, schema: &ReferenceOr<Box<Schema>>) -> Result<Schema> {
        match schema {
            ReferenceOr::Item(s) => Ok((**s).clone()),
            ReferenceOr::Reference { reference } => self.resolve(&ReferenceOr::<Schema>::Reference {
                reference: reference.clone(),
            }),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the reference is external, dangling, or cyclic.
    pub fn path_item(&self, item: &ReferenceOr<PathItem>) -> Result<PathItem> {
        self.resolve(item)
    }

    /// # Errors
    ///
    /// Returns an error if the reference is external, dangling, or cyclic.
    pub fn security_scheme(&self, scheme: &ReferenceOr<SecurityScheme>) -> Result<SecurityScheme> {
        self.resolve(scheme)
    }

    fn resolve<T>(&self, r: &ReferenceOr<T>) -> Result<T>
    where
        T: Clone + DeserializeOwned,
    {
        let mut seen: HashSet<String> = HashSet::new();
        let mut cur: ReferenceOr<T> = r.clone();

        loop {
            match cur {
                ReferenceOr::Item(item) => return Ok(item),
                ReferenceOr::Reference { reference } => {
                    if !seen.insert(reference.clone()) {
                        return Err(OpenApiToolsError::OpenApi(format!(
                            "Cyclic $ref detected while resolving: {reference}",
                        )));
                    }
                    let value = self.lookup(&reference)?;
                    cur = serde_json::from_value(value).map_err(|e| {
                        OpenApiToolsError::OpenApi(format!(
                            "Failed to deserialize referenced value '{reference}' as expected type: {e}",
                        ))
                    })?;
                }
            }
        }
    }

    fn lookup(&self, reference: &str) -> Result<Value> {
        let Some(fragment) = reference.strip_prefix('#') else {
            return Err(OpenApiToolsError::OpenApi(format!(
                "External $ref is not supported: {reference}",
            )));
        };
        if fragment.is_empty() {
            return Ok(self.root.clone());
        }
        if !fragment.starts_with('/') {
            return Err(OpenApiToolsError::OpenApi(format!(
                "Unsupported $ref fragment (expected JSON pointer starting with '/'): {reference}",
            )));
        }
        self.root.pointer(fragment).cloned().ok_or_else(|| {
            OpenApiToolsError::OpenApi(format!(
                "Unresolved $ref '{reference}' (missing pointer '{fragment}')",
            ))
        })
    }
}
