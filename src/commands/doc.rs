use crate::error::Result;
use crate::keys;
use crate::output::{self, Format};
use crate::store::aux::DocOwner;

use super::epic::Ctx;

/// Owner kind is implied by the key shape.
fn owner_of(key: &str) -> DocOwner {
    if keys::parse_task_key(key).is_ok() {
        DocOwner::Task
    } else if keys::parse_feature_key(key).is_ok() {
        DocOwner::Feature
    } else {
        DocOwner::Epic
    }
}

pub fn add(
    ctx: &Ctx<'_>,
    title: &str,
    file_path: &str,
    doc_type: Option<&str>,
    link_to: Option<&str>,
) -> Result<()> {
    let doc = ctx.with_store(|store| {
        let doc = store.create_document(title, file_path, doc_type)?;
        if let Some(key) = link_to {
            store.link_document(owner_of(key), key, doc.id)?;
        }
        Ok(doc)
    })?;
    match ctx.format {
        Format::Json => output::print_json(&doc),
        _ => {
            println!("document {} added", doc.id);
            Ok(())
        }
    }
}

pub fn link(ctx: &Ctx<'_>, key: &str, document_id: i64) -> Result<()> {
    ctx.with_store(|store| store.link_document(owner_of(key), key, document_id))?;
    match ctx.format {
        Format::Json => println!(
            "{}",
            serde_json::json!({"linked": {"key": key, "document_id": document_id}})
        ),
        _ => println!("document {document_id} linked to {key}"),
    }
    Ok(())
}

pub fn list(ctx: &Ctx<'_>, key: &str) -> Result<()> {
    let docs = ctx.with_store(|store| store.list_documents(owner_of(key), key))?;
    match ctx.format {
        Format::Json => output::print_json(&docs),
        _ => {
            for doc in docs {
                let doc_type = doc.doc_type.as_deref().unwrap_or("-");
                println!("{:>4}  {:<10} {}  {}", doc.id, doc_type, doc.title, doc.file_path);
            }
            Ok(())
        }
    }
}
