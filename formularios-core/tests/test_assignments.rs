mod common;
use common::{create_sample_form, setup_operator};
use formularios_core::assignment::{self, AssignmentRequest};
use formularios_core::form;
use formularios_core::users::{self, NewUser, UserPatch};
use opendal::Operator;

async fn encuestador(op: &Operator, nombre_usuario: &str, nombre: &str) -> anyhow::Result<()> {
    users::create_user(
        op,
        NewUser {
            nombre_usuario: nombre_usuario.to_string(),
            nombre: nombre.to_string(),
            correo: format!("{nombre_usuario}@ejemplo.cl"),
            activo: true,
            acceso_web: false,
        },
    )
    .await?;
    Ok(())
}

fn request(usuario: &str, formularios: &[&str], replace: bool) -> AssignmentRequest {
    AssignmentRequest {
        usuario: usuario.to_string(),
        formularios: formularios.iter().map(|f| f.to_string()).collect(),
        replace,
    }
}

#[tokio::test]
async fn test_assignments_batch_reports_new_and_existing() -> anyhow::Result<()> {
    let op = setup_operator()?;
    encuestador(&op, "campo1", "Equipo Uno").await?;
    let a = create_sample_form(&op, "A").await?;
    let b = create_sample_form(&op, "B").await?;

    let first = assignment::assign_forms(&op, request("campo1", &[&a.id, &a.id], false)).await?;
    assert!(first.ok);
    assert_eq!(first.asignados_nuevos, [a.id.clone()]);
    assert!(first.ya_asignados.is_empty());

    let second = assignment::assign_forms(&op, request("campo1", &[&a.id, &b.id], false)).await?;
    assert_eq!(second.asignados_nuevos, [b.id.clone()]);
    assert_eq!(second.ya_asignados, [a.id.clone()]);
    assert!(second.removidos.is_empty());
    assert_eq!(assignment::list_assignments(&op, Some("campo1")).await?.len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_assignments_replace_removes_stale() -> anyhow::Result<()> {
    let op = setup_operator()?;
    encuestador(&op, "campo2", "Equipo Dos").await?;
    let a = create_sample_form(&op, "A").await?;
    let b = create_sample_form(&op, "B").await?;
    assignment::assign_forms(&op, request("campo2", &[&a.id], false)).await?;

    let res = assignment::assign_forms(&op, request("campo2", &[&b.id], true)).await?;
    assert_eq!(res.asignados_nuevos, [b.id.clone()]);
    assert_eq!(res.removidos, [a.id.clone()]);

    let remaining: Vec<String> = assignment::list_assignments(&op, Some("campo2"))
        .await?
        .into_iter()
        .map(|x| x.id_formulario)
        .collect();
    assert_eq!(remaining, [b.id.clone()]);

    Ok(())
}

#[tokio::test]
async fn test_assignments_unknown_user_or_forms() -> anyhow::Result<()> {
    let op = setup_operator()?;
    let a = create_sample_form(&op, "A").await?;

    let err = assignment::assign_forms(&op, request("fantasma", &[&a.id], false))
        .await
        .unwrap_err();
    assert_eq!(err.field(), Some("usuario"));

    encuestador(&op, "campo3", "Equipo Tres").await?;
    let err = assignment::assign_forms(
        &op,
        request("campo3", &[&a.id, "11111111-2222-3333-4444-555555555555"], false),
    )
    .await
    .unwrap_err();
    assert_eq!(err.field(), Some("formularios"));
    assert!(assignment::list_assignments(&op, Some("campo3")).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_assignments_single_create_and_delete() -> anyhow::Result<()> {
    let op = setup_operator()?;
    encuestador(&op, "campo4", "Equipo Cuatro").await?;
    let a = create_sample_form(&op, "A").await?;

    let created = assignment::create_assignment(&op, "campo4", &a.id).await?;
    let err = assignment::create_assignment(&op, "campo4", &a.id).await.unwrap_err();
    assert_eq!(err.status_code(), 409);

    assignment::delete_assignment(&op, &created.id).await?;
    let err = assignment::delete_assignment(&op, &created.id).await.unwrap_err();
    assert!(err.is_not_found());

    Ok(())
}

#[tokio::test]
async fn test_assignments_options_list_active_only() -> anyhow::Result<()> {
    let op = setup_operator()?;
    encuestador(&op, "ana", "Ana Pérez").await?;
    encuestador(&op, "bruno", "Bruno Díaz").await?;
    encuestador(&op, "carla", "Carla Ana Soto").await?;
    users::update_user(
        &op,
        "bruno",
        UserPatch {
            activo: Some(false),
            ..UserPatch::default()
        },
    )
    .await?;
    create_sample_form(&op, "Zeta").await?;
    create_sample_form(&op, "Alfa").await?;
    let pausado = create_sample_form(&op, "Medio").await?;
    form::suspend(&op, &pausado.id).await?;

    let all = assignment::assignment_options(&op, None).await?;
    let users: Vec<&str> = all.usuarios.iter().map(|u| u.nombre_usuario.as_str()).collect();
    assert_eq!(users, ["ana", "carla"]);
    let forms: Vec<&str> = all.formularios.iter().map(|f| f.nombre.as_str()).collect();
    assert_eq!(forms, ["Alfa", "Zeta"]);

    let filtered = assignment::assignment_options(&op, Some("ANA")).await?;
    assert_eq!(filtered.usuarios.len(), 2);
    let filtered = assignment::assignment_options(&op, Some("carla")).await?;
    assert_eq!(filtered.usuarios.len(), 1);

    Ok(())
}
