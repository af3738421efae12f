mod common;
use common::{create_sample_form, setup_operator};
use formularios_core::field::{self, NewField};
use formularios_core::page::{self, NewPage};
use formularios_core::{duplicate_form, form, group, version, EngineConfig, FormError, MemoryClassRegistry};
use serde_json::json;
use std::collections::HashSet;

#[tokio::test]
async fn test_duplicate_named_copy_has_fresh_identity() -> anyhow::Result<()> {
    let op = setup_operator()?;
    let config = EngineConfig::default();
    let source = create_sample_form(&op, "Original").await?;

    let copy = duplicate_form(&op, &config, &source.id, Some("Clon")).await?;
    assert_ne!(copy.id, source.id);
    assert_eq!(copy.nombre, "Clon");
    assert_eq!(copy.descripcion, source.descripcion);
    assert_eq!(copy.permitir_fotos, source.permitir_fotos);
    assert_eq!(copy.permitir_gps, source.permitir_gps);
    assert_eq!(copy.disponible_desde_fecha, source.disponible_desde_fecha);
    assert_eq!(copy.forma_envio, source.forma_envio);

    let source_versions: HashSet<String> = version::list_versions(&op, &source.id)
        .await?
        .into_iter()
        .map(|v| v.id_index_version)
        .collect();
    let copy_versions = version::list_versions(&op, &copy.id).await?;
    assert_eq!(copy_versions.len(), 1);
    assert!(!source_versions.contains(&copy_versions[0].id_index_version));

    Ok(())
}

#[tokio::test]
async fn test_duplicate_default_name_uses_copy_suffix() -> anyhow::Result<()> {
    let op = setup_operator()?;
    let config = EngineConfig::default();
    let source = create_sample_form(&op, "Censo").await?;

    let unnamed = duplicate_form(&op, &config, &source.id, None).await?;
    assert_eq!(unnamed.nombre, "Censo_Copia");
    let blank = duplicate_form(&op, &config, &source.id, Some("  ")).await?;
    assert_eq!(blank.nombre, "Censo_Copia");

    Ok(())
}

#[tokio::test]
async fn test_duplicate_clones_latest_version_tree() -> anyhow::Result<()> {
    let op = setup_operator()?;
    let config = EngineConfig::default();
    let registry = MemoryClassRegistry::with_defaults();
    let source = create_sample_form(&op, "Árbol").await?;

    page::add_page(&op, &config, &source.id, NewPage::named("Datos"), Some("1")).await?;
    page::add_page(&op, &config, &source.id, NewPage::named("Cierre"), None).await?;
    let latest = version::latest_version(&op, &source.id)
        .await?
        .expect("latest version");
    let source_pages = page::pages_for_version(&op, &source.id, &latest.id_index_version).await?;
    assert_eq!(source_pages.len(), 2);

    let mut dataset = NewField::new("dataset", "comuna", "Comuna");
    dataset.config = Some(json!({"fuente_id": "f1", "mode": "single", "column": "nombre"}));
    let ds = field::add_field_to_page(&op, &config, &registry, &source_pages[0].id_pagina, dataset).await?;
    field::add_field_to_page(
        &op,
        &config,
        &registry,
        &source_pages[0].id_pagina,
        NewField::new("string", "direccion", "Dirección"),
    )
    .await?;

    let copy = duplicate_form(&op, &config, &source.id, Some("Árbol 2")).await?;
    let copy_pages = page::list_pages(&op, Some(&copy.id)).await?;
    let shape: Vec<(u32, &str)> = copy_pages
        .iter()
        .map(|p| (p.secuencia, p.nombre.as_str()))
        .collect();
    assert_eq!(shape, [(1, "Datos"), (2, "Cierre")]);

    let copied = page::get_page(&op, &copy_pages[0].id_pagina, true)
        .await?
        .campos
        .unwrap_or_default();
    assert_eq!(copied.len(), 2);
    assert_eq!(copied[0].campo.nombre_campo, "comuna");
    assert_ne!(copied[0].campo.id_campo, ds.campo.id_campo);
    assert_eq!(copied[0].campo.config, ds.campo.config);
    assert_eq!(copied[1].campo.nombre_campo, "direccion");
    assert_eq!(copied[1].sequence, 2);

    let source_detail = page::get_page(&op, &source_pages[0].id_pagina, true).await?;
    assert_eq!(source_detail.campos.map(|c| c.len()), Some(2));

    Ok(())
}

#[tokio::test]
async fn test_duplicate_errors() -> anyhow::Result<()> {
    let op = setup_operator()?;
    let config = EngineConfig::default();

    let err = duplicate_form(&op, &config, "11111111-2222-3333-4444-555555555555", None)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 404);

    let source = create_sample_form(&op, "Pausado").await?;
    form::suspend(&op, &source.id).await?;
    let err = duplicate_form(&op, &config, &source.id, None).await.unwrap_err();
    assert!(matches!(err, FormError::Locked(_)));

    Ok(())
}

#[tokio::test]
async fn test_duplicate_groups_belong_to_the_copy() -> anyhow::Result<()> {
    let op = setup_operator()?;
    let config = EngineConfig::default();
    let registry = MemoryClassRegistry::with_defaults();
    let source = create_sample_form(&op, "Hogares").await?;
    let page_id = page::list_pages(&op, Some(&source.id)).await?[0].id_pagina.clone();

    let container = field::add_field_to_page(
        &op,
        &config,
        &registry,
        &page_id,
        NewField::new("group", "hogar", "Hogar"),
    )
    .await?;
    let source_group = container.campo.group_id().expect("group id").to_string();
    let mut child = NewField::new("string", "jefe_hogar", "Jefe de hogar");
    child.grupo = Some(source_group.clone());
    let child = field::add_field_to_page(&op, &config, &registry, &page_id, child).await?;

    let copy = duplicate_form(&op, &config, &source.id, None).await?;

    let source_members = group::group_members(&op, &source_group).await?;
    assert_eq!(source_members.len(), 1);
    assert_eq!(source_members[0].id_campo, child.campo.id_campo);
    assert_eq!(
        group::get_group(&op, &source_group).await?.id_campo_group,
        container.campo.id_campo
    );

    let copy_page = page::list_pages(&op, Some(&copy.id)).await?[0].id_pagina.clone();
    let copied = page::get_page(&op, &copy_page, true)
        .await?
        .campos
        .unwrap_or_default();
    let copy_container = &copied[0].campo;
    let copy_child = &copied[1].campo;
    let copy_group = copy_container.group_id().expect("copied group id").to_string();
    assert_ne!(copy_group, source_group);
    assert_eq!(
        group::get_group(&op, &copy_group).await?.id_campo_group,
        copy_container.id_campo
    );
    assert_eq!(copy_child.grupo.as_deref(), Some(copy_group.as_str()));

    let copy_members = group::group_members(&op, &copy_group).await?;
    assert_eq!(copy_members.len(), 1);
    assert_eq!(copy_members[0].id_campo, copy_child.id_campo);

    Ok(())
}
