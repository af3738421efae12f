use anyhow::Result;
use chrono::NaiveDate;
use formularios_core::form::{self, Form, NewForm};
use formularios_core::EngineConfig;
use opendal::services::Memory;
use opendal::Operator;

#[allow(dead_code)]
pub fn setup_operator() -> Result<Operator> {
    let builder = Memory::default();
    let op = Operator::new(builder)?.finish();
    Ok(op)
}

#[allow(dead_code)]
pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

#[allow(dead_code)]
pub fn sample_new_form(nombre: &str) -> NewForm {
    let mut new = NewForm::new(nombre, date(2024, 1, 1), date(2024, 12, 31));
    new.descripcion = format!("Descripción de {nombre}");
    new.permitir_fotos = true;
    new
}

#[allow(dead_code)]
pub async fn create_sample_form(op: &Operator, nombre: &str) -> Result<Form> {
    Ok(form::create_form(op, &EngineConfig::default(), sample_new_form(nombre)).await?)
}
