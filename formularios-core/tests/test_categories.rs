mod common;
use common::{sample_new_form, setup_operator};
use formularios_core::category::{self, CategoryPatch, NewCategory};
use formularios_core::{form, EngineConfig};

fn named(nombre: &str) -> NewCategory {
    NewCategory {
        nombre: nombre.to_string(),
        descripcion: None,
    }
}

#[tokio::test]
async fn test_categories_names_are_unique_and_required() -> anyhow::Result<()> {
    let op = setup_operator()?;
    let salud = category::create_category(&op, named(" Salud ")).await?;
    assert_eq!(salud.nombre, "Salud");

    let err = category::create_category(&op, named("SALUD")).await.unwrap_err();
    assert_eq!(err.status_code(), 409);

    let err = category::create_category(&op, named("   ")).await.unwrap_err();
    assert_eq!(err.field(), Some("nombre"));

    let educacion = category::create_category(&op, named("educación")).await?;
    let names: Vec<String> = category::list_categories(&op)
        .await?
        .into_iter()
        .map(|c| c.nombre)
        .collect();
    assert_eq!(names, ["educación", "Salud"]);

    let err = category::update_category(
        &op,
        &educacion.id,
        CategoryPatch {
            nombre: Some("salud".to_string()),
            descripcion: None,
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.field(), Some("nombre"));

    Ok(())
}

#[tokio::test]
async fn test_categories_delete_blocked_while_linked() -> anyhow::Result<()> {
    let op = setup_operator()?;
    let config = EngineConfig::default();
    let vivienda = category::create_category(&op, named("Vivienda")).await?;

    let mut new = sample_new_form("Catastro");
    new.categoria = Some(vivienda.id.clone());
    let linked = form::create_form(&op, &config, new).await?;

    let err = category::delete_category(&op, &vivienda.id).await.unwrap_err();
    assert_eq!(err.field(), Some("categoria"));

    form::delete_form(&op, &linked.id).await?;
    category::delete_category(&op, &vivienda.id).await?;
    assert!(category::get_category(&op, &vivienda.id)
        .await
        .unwrap_err()
        .is_not_found());

    Ok(())
}

#[tokio::test]
async fn test_categories_unknown_category_rejected_on_form() -> anyhow::Result<()> {
    let op = setup_operator()?;
    let mut new = sample_new_form("Huérfano");
    new.categoria = Some("no-existe".to_string());
    let err = form::create_form(&op, &EngineConfig::default(), new)
        .await
        .unwrap_err();
    assert_eq!(err.field(), Some("categoria"));
    Ok(())
}
