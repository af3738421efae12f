use crate::error::Result;
use crate::form;
use crate::page;
use crate::version;
use opendal::Operator;
use serde_json::{json, Value};

/// Renders the latest version of a form as the structure frozen into entries.
///
/// Each field's `sequence` is its position across the whole form, so sorting
/// by it never interleaves pages; `sequence_pagina` keeps the page-local one.
pub async fn form_structure(op: &Operator, form_id: &str) -> Result<Value> {
    let owner = form::load_form(op, form_id).await?;
    let Some(latest) = version::latest_version(op, form_id).await? else {
        return Ok(json!({
            "id_formulario": owner.id,
            "nombre": owner.nombre,
            "index_version_id": null,
            "paginas": [],
        }));
    };

    let mut position: i64 = 0;
    let mut paginas = Vec::new();
    for p in page::pages_for_version(op, form_id, &latest.id_index_version).await? {
        let mut campos = Vec::new();
        for bound in page::page_fields(op, &p).await? {
            position += 1;
            let campo = bound.campo;
            campos.push(json!({
                "id_campo": campo.id_campo,
                "nombre_interno": campo.nombre_campo,
                "etiqueta": campo.etiqueta,
                "clase": campo.clase,
                "tipo": campo.tipo,
                "requerido": campo.requerido,
                "sequence": position,
                "sequence_pagina": bound.sequence,
                "config": campo.config,
            }));
        }
        paginas.push(json!({
            "id_pagina": p.id_pagina,
            "nombre": p.nombre,
            "secuencia": p.secuencia,
            "campos": campos,
        }));
    }

    Ok(json!({
        "id_formulario": owner.id,
        "nombre": owner.nombre,
        "index_version_id": latest.id_index_version,
        "paginas": paginas,
    }))
}
