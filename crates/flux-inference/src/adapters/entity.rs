pub mod detection {
    use sea_orm::entity::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "detections")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub camera_id: String,
        /// 毫秒时间戳
        pub timestamp: i64,
        pub frame_seq: i64,
        pub label: String,
        pub confidence: f32,
        pub bbox_x_center: f32,
        pub bbox_y_center: f32,
        pub bbox_width: f32,
        pub bbox_height: f32,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}
