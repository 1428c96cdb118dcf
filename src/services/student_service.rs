use crate::dto::student_dto::CreateStudentRequest;
use crate::error::{Error, Result};
use crate::models::student::Student;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Clone)]
pub struct StudentService {
    pool: PgPool,
}

impl StudentService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create_student(&self, payload: CreateStudentRequest) -> Result<Student> {
        let student = sqlx::query_as::<_, Student>(
            r#"
            INSERT INTO students (id, name, grade_label, branch)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&payload.name)
        .bind(&payload.grade_label)
        .bind(&payload.branch)
        .fetch_one(&self.pool)
        .await?;
        Ok(student)
    }

    pub async fn get_student(&self, student_id: Uuid) -> Result<Student> {
        let student = sqlx::query_as::<_, Student>(r#"SELECT * FROM students WHERE id = $1"#)
            .bind(student_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound("Student not found".to_string()))?;
        Ok(student)
    }

    pub async fn list_students(&self) -> Result<Vec<Student>> {
        let students =
            sqlx::query_as::<_, Student>(r#"SELECT * FROM students ORDER BY created_at DESC"#)
                .fetch_all(&self.pool)
                .await?;
        Ok(students)
    }

    pub async fn delete_student(&self, student_id: Uuid) -> Result<()> {
        let result = sqlx::query(r#"DELETE FROM students WHERE id = $1"#)
            .bind(student_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound("Student not found".to_string()));
        }
        Ok(())
    }
}
